//! Sample hijackable functions (§8 scenarios S1-S5), standing in for the Go
//! original's `example/dummy-server/main.go` / `test/example/main.go` demo
//! target. `hijack-core`'s integration tests depend on this crate so they can
//! resolve and patch a real statically-linked function without needing a
//! second process to attach to.
//!
//! Every target is `extern "C"` and `#[no_mangle]`: the symbol table has to
//! carry the plain function name `hijack-resolver` looks functions up by,
//! and the real System V calling convention the JIT entry stub must match is
//! only pinned down once linkage stops being whatever ABI rustc's own Rust
//! calling convention happens to pick. Returning a `*mut c_char` rather than
//! a native `String` keeps every slot a single machine word — a 24-byte
//! `String` return would need a hidden sret pointer, which the dispatch
//! layer's `(I64 x n) -> (I64 x n)` stub signature does not model (see
//! DESIGN.md).

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

fn leak_string(s: String) -> *mut c_char {
    CString::new(s)
        .expect("i64::to_string never embeds a NUL")
        .into_raw()
}

/// `#[inline(never)]` keeps this materialized as its own subprogram with a
/// stable entry address; an inlined call site has no single address to patch.
#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test(i: i64) -> *mut c_char {
    leak_string(i.to_string())
}

/// Separate entry points for each scenario below so independent tests can
/// patch them concurrently without contending for the same target; each
/// just reuses `this_is_for_test`'s body under its own symbol.
#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test_panic(i: i64) -> *mut c_char {
    leak_string(i.to_string())
}

#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test_set(i: i64) -> *mut c_char {
    leak_string(i.to_string())
}

#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test_return(i: i64) -> *mut c_char {
    leak_string(i.to_string())
}

#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test_twice(i: i64) -> *mut c_char {
    leak_string(i.to_string())
}

#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test_release(i: i64) -> *mut c_char {
    leak_string(i.to_string())
}

/// Two-return target for S5. The second slot carries an error message; an
/// empty string stands in for Go's nil error. Kept as a native Rust tuple
/// rather than a named `#[repr(C)]` struct so its DWARF shape is still the
/// anonymous `__0`/`__1` tuple `hijack-resolver`'s tuple-flattening
/// recognizes (two pointer-sized fields, which System V returns in
/// `rax`/`rdx` without an sret pointer either way).
#[inline(never)]
#[no_mangle]
pub extern "C" fn with_fallible_result(i: i64) -> (*mut c_char, *mut c_char) {
    (leak_string(i.to_string()), leak_string(String::new()))
}

/// Read a pointer produced by one of the functions above back into an owned
/// `String` — for callers (tests, `main` below) that would rather not reach
/// for `CStr` themselves. Does not free `ptr`; see the module doc's note on
/// leaking.
///
/// # Safety
/// `ptr` must be a non-null, NUL-terminated string produced by this module.
pub unsafe fn read(ptr: *mut c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn this_is_for_test_stringifies_its_input() {
        unsafe {
            assert_eq!(read(this_is_for_test(0)), "0");
            assert_eq!(read(this_is_for_test(1024)), "1024");
        }
    }

    #[test]
    fn with_fallible_result_has_no_error_by_default() {
        let (value, err) = with_fallible_result(7);
        unsafe {
            assert_eq!(read(value), "7");
            assert!(read(err).is_empty());
        }
    }
}
