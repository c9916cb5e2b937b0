//! Hijack-point data model (§3: HijackPoint).
//!
//! This is the envelope a control-surface request parser decodes into and
//! the action library consumes. Kept free of any serialization dependency
//! so `hijack-control`'s JSON/key:value parsers are the only place that
//! needs to know how a wire request maps onto this shape.

/// One of the four installable behaviors (§4.F Action Library).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Sleep for `val` milliseconds, then call through to the original.
    Delay,
    /// Abort the caller with message `"hijack:<val>"`; never calls through.
    Panic,
    /// Overwrite `args[index]`, then call through to the original.
    Set,
    /// Call through to the original, then overwrite `results[index]`.
    Return,
}

impl ActionKind {
    /// Parse the control-surface action name (§6 command table).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delay" => Some(Self::Delay),
            "panic" => Some(Self::Panic),
            "set" => Some(Self::Set),
            "return" => Some(Self::Return),
            _ => None,
        }
    }

    /// The textual name this action is addressed by over the control surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::Panic => "panic",
            Self::Set => "set",
            Self::Return => "return",
        }
    }
}

/// An arbitrary `val` payload (§3: "an arbitrary value whose runtime type
/// must be assignable to the input/output slot at `index`").
///
/// A small closed union is enough here: every action's `val` is either a
/// number, a bool, or text, and the control surface's JSON/key:value parsers
/// both bottom out in one of these four shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum HijackValue {
    /// A signed integer (delay's millisecond count; a numeric set/return value).
    Int(i64),
    /// An unsigned integer, for slots typed as `uint`.
    Uint(u64),
    /// A boolean value.
    Bool(bool),
    /// Text (panic's message; a string set/return value).
    Str(String),
}

impl HijackValue {
    /// View as a signed integer if this value holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HijackValue::Int(v) => Some(*v),
            HijackValue::Uint(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// View as text, regardless of the underlying variant.
    pub fn render(&self) -> String {
        match self {
            HijackValue::Int(v) => v.to_string(),
            HijackValue::Uint(v) => v.to_string(),
            HijackValue::Bool(v) => v.to_string(),
            HijackValue::Str(v) => v.clone(),
        }
    }
}

/// A hijack request envelope (§3: HijackPoint).
#[derive(Debug, Clone, PartialEq)]
pub struct HijackPoint {
    /// Fully-qualified target function name.
    pub func: String,
    /// The action to install.
    pub action: ActionKind,
    /// The action's payload.
    pub val: HijackValue,
    /// The argument/return slot index, for `set`/`return`.
    pub index: Option<usize>,
}
