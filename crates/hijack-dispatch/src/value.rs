//! Dynamic value representation marshaled across the dispatch boundary.
//!
//! Every slot in a hijack call — substitute input, substitute output, or a
//! call-through argument — is exactly one machine word (§3's word-width
//! policy, recorded on [`hijack_resolver::TypeDescriptor::is_word_sized`]).
//! For a scalar the word *is* the value. For text, the word is a raw
//! `*mut c_char` into a NUL-terminated, heap-allocated C string — the same
//! representation the real `extern "C"` target functions this engine
//! patches use for their own `-> *mut c_char` returns (see DESIGN.md), so
//! the JIT'd entry stub's `(I64 x n) -> (I64 x n)` signature is the
//! target's genuine System V ABI rather than an approximation of it. A
//! [`DynValue`] is the typed view a substitute closure actually reads and
//! writes; [`word_to_value`]/[`value_to_word`] convert between that view and
//! the raw word on either side of the JIT boundary.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use hijack_resolver::{ScalarKind, TypeDescriptor};

use crate::heap::ValueHeap;

/// A marshaled call-boundary value.
///
/// `Handle` covers every composite [`TypeDescriptor`] (struct, slice, map,
/// chan, interface, opaque pointer) uniformly: the dispatch layer never
/// needs to know a composite's shape, only that it round-trips through
/// [`ValueHeap`] by handle. No hijackable target in this corpus actually
/// carries a composite-valued parameter or return — an `extern "C"`
/// signature has no FFI-safe way to — so this path exists for the type
/// model's generality rather than because `word_to_value`/`value_to_word`
/// ever exercise it against a real machine word.
#[derive(Debug, Clone, PartialEq)]
pub enum DynValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    Str(String),
    /// A boxed composite value, by heap handle.
    Handle(u64),
}

impl DynValue {
    /// View as a signed integer, coercing from any scalar kind.
    pub fn as_int(&self) -> i64 {
        match self {
            DynValue::Int(v) => *v,
            DynValue::Uint(v) => *v as i64,
            DynValue::Bool(v) => *v as i64,
            DynValue::Str(_) | DynValue::Handle(_) => 0,
        }
    }

    /// View as text; non-string values render with their `Debug` form so a
    /// substitute can always format a result regardless of declared type.
    pub fn as_str(&self) -> String {
        match self {
            DynValue::Str(s) => s.clone(),
            other => format!("{other:?}"),
        }
    }
}

/// Unpack one raw call-boundary word into a [`DynValue`] per `desc`.
pub fn word_to_value(word: i64, desc: &TypeDescriptor, heap: &ValueHeap) -> DynValue {
    match desc {
        TypeDescriptor::Scalar(ScalarKind::Int) => DynValue::Int(word),
        TypeDescriptor::Scalar(ScalarKind::Uint) => DynValue::Uint(word as u64),
        TypeDescriptor::Scalar(ScalarKind::Bool) => DynValue::Bool(word != 0),
        TypeDescriptor::Scalar(ScalarKind::String) => DynValue::Str(read_c_string(word)),
        _ => DynValue::Handle(word as u64),
    }
}

/// Pack a [`DynValue`] into one raw call-boundary word per `desc`, boxing
/// onto `heap` when the descriptor needs more than a scalar word.
pub fn value_to_word(value: &DynValue, desc: &TypeDescriptor, heap: &ValueHeap) -> i64 {
    match desc {
        TypeDescriptor::Scalar(ScalarKind::Int) => value.as_int(),
        TypeDescriptor::Scalar(ScalarKind::Uint) => value.as_int(),
        TypeDescriptor::Scalar(ScalarKind::Bool) => value.as_int(),
        TypeDescriptor::Scalar(ScalarKind::String) => new_c_string(&value.as_str()),
        _ => match value {
            DynValue::Handle(h) => *h as i64,
            other => heap.put(other.clone()) as i64,
        },
    }
}

/// Read a native `*mut c_char` word — a real target's own string return, or
/// one freshly built by [`new_c_string`] — back into an owned `String`. A
/// null word reads as empty.
fn read_c_string(word: i64) -> String {
    if word == 0 {
        return String::new();
    }
    unsafe { CStr::from_ptr(word as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

/// Build a fresh NUL-terminated C string on the heap and hand back its
/// address as a word. Intentionally leaked: ownership of a string crossing
/// this boundary works the same way it would for any `extern "C" fn() ->
/// *mut c_char` return — the receiver decides whether and how to free it,
/// and nothing on this side keeps the pointer to free later.
fn new_c_string(text: &str) -> i64 {
    let safe = CString::new(text).unwrap_or_else(|_| {
        CString::new(text.replace('\0', "")).expect("NUL bytes stripped")
    });
    safe.into_raw() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips_without_touching_heap() {
        let heap = ValueHeap::new();
        let desc = TypeDescriptor::Scalar(ScalarKind::Int);
        let v = word_to_value(-7, &desc, &heap);
        assert_eq!(v, DynValue::Int(-7));
        assert_eq!(value_to_word(&v, &desc, &heap), -7);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn string_round_trips_through_a_raw_c_string_word() {
        let heap = ValueHeap::new();
        let desc = TypeDescriptor::Scalar(ScalarKind::String);
        let word = value_to_word(&DynValue::Str("doom".into()), &desc, &heap);
        assert_ne!(word, 0);
        let back = word_to_value(word, &desc, &heap);
        assert_eq!(back, DynValue::Str("doom".into()));
        assert_eq!(heap.len(), 0, "string marshaling must not touch the composite heap");
    }

    #[test]
    fn null_word_reads_as_empty_string() {
        let heap = ValueHeap::new();
        let desc = TypeDescriptor::Scalar(ScalarKind::String);
        assert_eq!(word_to_value(0, &desc, &heap), DynValue::Str(String::new()));
    }
}
