//! Standalone runnable form of the demo target, playing the same role the
//! Go original's `example/dummy-server/main.go` plays: a process with a
//! couple of hijackable functions that keeps calling them so an operator
//! driving `hijack-cli` against it (or a test harness) can see the effect
//! of an installed hijack. This binary does not itself embed the engine;
//! `hijack-cli` is the bootstrap binary (§6's Bootstrap API).

use std::time::Duration;

fn main() {
    loop {
        let echoed = unsafe { dummy_target::read(dummy_target::this_is_for_test(0)) };
        let (value, err) = dummy_target::with_fallible_result(0);
        let (value, err) = unsafe { (dummy_target::read(value), dummy_target::read(err)) };
        if err.is_empty() {
            eprintln!("this_is_for_test:{echoed} with_fallible_result:{value}");
        } else {
            eprintln!("this_is_for_test:{echoed} with_fallible_result error:{err}");
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}
