//! End-to-end tests against a real statically-linked target (§8 properties
//! S1-S5), run in-process against this test binary's own symbol table and
//! DWARF (possible because the workspace's release/dev profiles keep both;
//! see DESIGN.md). `dummy_target` supplies the hijackable functions, the
//! same role the Go original's `example/dummy-server/main.go` demo plays.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::time::Instant;

use hijack_core::{ActionKind, HijackPoint, HijackValue};

/// Read back a `*mut c_char` one of `dummy_target`'s `extern "C"` functions
/// returned. These tests never free it — matching `dummy_target::read`'s own
/// leak-and-move-on stance, see its module doc.
unsafe fn read(ptr: *mut c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

fn point(func: &str, action: ActionKind, val: HijackValue, index: Option<usize>) -> HijackPoint {
    HijackPoint {
        func: func.to_string(),
        action,
        val,
        index,
    }
}

#[test]
fn s1_delay_sleeps_then_returns_the_original_value() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "this_is_for_test",
            ActionKind::Delay,
            HijackValue::Int(500),
            None,
        ))
        .expect("delay installs against a resolvable target");

    let started = Instant::now();
    let result = unsafe { read(dummy_target::this_is_for_test(0)) };
    let elapsed = started.elapsed();

    assert_eq!(result, "0");
    assert!(elapsed.as_millis() >= 500, "elapsed {elapsed:?} should be at least 500ms");

    hijacker.release("this_is_for_test");
}

#[test]
fn s2_panic_aborts_the_caller_with_the_hijack_prefixed_message() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "this_is_for_test_panic",
            ActionKind::Panic,
            HijackValue::Str("boom".to_string()),
            None,
        ))
        .expect("panic installs against a resolvable target");

    let caught = std::panic::catch_unwind(|| dummy_target::this_is_for_test_panic(0));
    let message = caught
        .expect_err("a panic action must unwind the caller")
        .downcast::<String>()
        .map(|s| *s)
        .unwrap_or_default();
    assert!(message.contains("hijack:boom"), "message was {message:?}");

    hijacker.release("this_is_for_test_panic");
}

#[test]
fn s3_set_overwrites_the_argument_before_calling_through() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "this_is_for_test_set",
            ActionKind::Set,
            HijackValue::Int(1024),
            Some(0),
        ))
        .expect("set installs against a resolvable target");

    assert_eq!(unsafe { read(dummy_target::this_is_for_test_set(0)) }, "1024");

    hijacker.release("this_is_for_test_set");
}

#[test]
fn s4_return_overwrites_the_result_after_calling_through() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "this_is_for_test_return",
            ActionKind::Return,
            HijackValue::Str("1024".to_string()),
            Some(0),
        ))
        .expect("return installs against a resolvable target");

    assert_eq!(unsafe { read(dummy_target::this_is_for_test_return(0)) }, "1024");

    hijacker.release("this_is_for_test_return");
}

#[test]
fn s5_return_on_a_two_output_target_overwrites_only_the_chosen_slot() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "with_fallible_result",
            ActionKind::Return,
            HijackValue::Str("doom".to_string()),
            Some(1),
        ))
        .expect("return installs against a two-output target");

    let (value, err) = dummy_target::with_fallible_result(7);
    let (value, err) = unsafe { (read(value), read(err)) };
    assert_eq!(value, "7");
    assert_eq!(err, "doom");

    hijacker.release("with_fallible_result");
}

#[test]
fn a_function_cannot_be_patched_twice_at_once() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "this_is_for_test_twice",
            ActionKind::Delay,
            HijackValue::Int(1),
            None,
        ))
        .expect("first apply installs cleanly");

    let err = hijacker
        .apply(point(
            "this_is_for_test_twice",
            ActionKind::Delay,
            HijackValue::Int(1),
            None,
        ))
        .expect_err("a second apply on an already-patched function must fail");
    assert!(matches!(err, hijack_core::HijackError::PatchedAlready(_)));

    hijacker.release("this_is_for_test_twice");
}

#[test]
fn release_is_case_insensitive_and_restores_original_behavior() {
    let hijacker = hijack_core::start().expect("test binary carries its own debug info");
    hijacker
        .apply(point(
            "this_is_for_test_release",
            ActionKind::Return,
            HijackValue::Str("overridden".to_string()),
            Some(0),
        ))
        .expect("return installs cleanly");

    assert_eq!(unsafe { read(dummy_target::this_is_for_test_release(0)) }, "overridden");

    hijacker.release("THIS_IS_FOR_TEST_RELEASE");

    assert_eq!(unsafe { read(dummy_target::this_is_for_test_release(0)) }, "0");
}
