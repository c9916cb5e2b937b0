//! `hijack-cli` — the engine's bootstrap binary (§6 Bootstrap API).
//!
//! A process embedding this engine calls the `hijack-core`/`hijack-control`
//! bootstrap the way this binary does: resolve its own symbol table and
//! debug info, start the applier thread, start the control surface, then
//! block until a signal arrives. `main` itself carries one sample
//! hijackable function (`this_is_for_test`) so `hijack-cli` is runnable and
//! inspectable on its own, the same role the Go original's
//! `example/dummy-server/main.go` plays for the source repository.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hijack_control::{ControlServer, DEFAULT_SOCKET_PATH};

/// Run the hijack engine's control surface against this process.
#[derive(Parser)]
#[command(name = "hijack-cli")]
#[command(about = "Runtime function-hijack engine: resolver, applier, and control socket")]
#[command(version)]
struct Cli {
    /// Unix-domain-socket path the control surface listens on.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
    /// How often (ms) the demo loop calls `this_is_for_test`, purely so an
    /// operator watching logs can see the effect of an installed hijack.
    #[arg(long, default_value = "1000")]
    demo_interval_ms: u64,
}

/// The engine's sample hijack target (§8 S1-S5's `this_is_for_test`).
///
/// `#[inline(never)]` keeps this function materialized as its own
/// subprogram with a stable entry address — an aggressively inlined
/// function has no single entry point left to patch (§9's inlining
/// caveat; see DESIGN.md). `extern "C"` and `#[no_mangle]` so the symbol
/// table carries the plain name `hijack-resolver` looks it up by, and the
/// JIT entry stub's genuine System V ABI is pinned down. Returning a
/// `*mut c_char` rather than `String` keeps the return a single word — see
/// `demos/dummy-target`'s module doc and DESIGN.md for why a `String`
/// return cannot be modeled this way.
#[inline(never)]
#[no_mangle]
pub extern "C" fn this_is_for_test(i: i64) -> *mut c_char {
    std::ffi::CString::new(i.to_string())
        .expect("i64::to_string never embeds a NUL")
        .into_raw()
}

/// Read back a pointer produced by `this_is_for_test`; does not free it (the
/// demo loop below calls it once a second for process lifetime, not in a
/// tight loop, so the leak is immaterial here).
///
/// # Safety
/// `ptr` must be a non-null, NUL-terminated string produced by
/// `this_is_for_test`.
unsafe fn read_this_is_for_test(ptr: *mut c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let hijacker = Arc::new(hijack_core::start().map_err(|e| anyhow::anyhow!("engine setup failed: {e}"))?);
    tracing::info!(funcs = hijacker.funcs().len(), "resolved host binary");

    let mut control = ControlServer::start(&cli.socket, hijacker.clone())
        .map_err(|e| anyhow::anyhow!("control surface setup failed: {e}"))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())?;

    tracing::info!(socket = %cli.socket.display(), "hijack-cli ready");

    let interval = Duration::from_millis(cli.demo_interval_ms);
    while !shutdown.load(Ordering::Relaxed) {
        let result = unsafe { read_this_is_for_test(this_is_for_test(0)) };
        tracing::debug!(%result, "demo call");
        std::thread::sleep(interval);
    }

    tracing::info!("shutting down");
    control.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn this_is_for_test_stringifies_its_input() {
        unsafe {
            assert_eq!(read_this_is_for_test(this_is_for_test(0)), "0");
            assert_eq!(read_this_is_for_test(this_is_for_test(1024)), "1024");
        }
    }
}
