//! The Unix-domain-socket control surface (§6, §4.H).
//!
//! One listener thread accepts connections; each connection is handed to
//! its own thread (mirroring the source's `go s.serve(conn)` in `uds.go`),
//! reads exactly one line, dispatches it, writes exactly one line back, and
//! closes. Shutdown is cooperative: the listener is put in non-blocking
//! mode and polls a cancellation flag between `accept` attempts, since a
//! blocking `accept()` has no portable std-only way to be interrupted.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hijack_core::Hijacker;

use crate::dispatch::handle_line;

/// Default control-socket path (§6: "a compile-time constant; overridable").
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/gohijack.sock";

/// How often the accept loop wakes up to check the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors raised standing up the control surface (folds into the bootstrap
/// API's `SetupFailed`, §6).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The socket path could not be bound (already in use, bad path, etc).
    #[error("failed to bind control socket at {path}: {cause}")]
    Bind {
        /// Path that failed to bind.
        path: PathBuf,
        /// Underlying I/O error text.
        cause: String,
    },
}

/// The running control surface: an accept-loop thread plus everything
/// needed to shut it down cleanly.
pub struct ControlServer {
    path: PathBuf,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Bind `path` and start accepting connections (§6 Bootstrap API: "returns
    /// when the socket is listening").
    ///
    /// Removes any stale socket file left behind by a prior, uncleanly
    /// terminated run before binding — `UnixListener::bind` otherwise fails
    /// with `AddrInUse` on a leftover path.
    pub fn start(path: impl AsRef<Path>, hijacker: Arc<Hijacker>) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }

        let listener = UnixListener::bind(&path).map_err(|e| ServerError::Bind {
            path: path.clone(),
            cause: e.to_string(),
        })?;
        listener.set_nonblocking(true).map_err(|e| ServerError::Bind {
            path: path.clone(),
            cause: e.to_string(),
        })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_for_worker = cancelled.clone();

        let worker = thread::Builder::new()
            .name("hijack-control".into())
            .spawn(move || accept_loop(listener, hijacker, cancelled_for_worker))
            .expect("spawning the control-surface accept thread");

        tracing::info!(path = %path.display(), "control surface listening");
        Ok(Self {
            path,
            cancelled,
            worker: Some(worker),
        })
    }

    /// Stop accepting connections and unlink the socket path (§5
    /// cancellation: "A separate signal-driven shutdown closes the
    /// control-surface listener and unlinks its socket path").
    ///
    /// Idempotent: a second call after the worker has already stopped is a
    /// no-op.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn accept_loop(listener: UnixListener, hijacker: Arc<Hijacker>, cancelled: Arc<AtomicBool>) {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                let hijacker = hijacker.clone();
                thread::spawn(move || serve(stream, &hijacker));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(%e, "control surface accept error");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Serve one connection: read a single line, dispatch, write a single line
/// back, close (§6 command table).
fn serve(stream: UnixStream, hijacker: &Hijacker) {
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%e, "failed to clone control connection");
            return;
        }
    };
    let mut reader = BufReader::new(reader_stream);
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return;
    }

    let response = handle_line(line, hijacker);
    let mut writer = stream;
    let _ = writer.write_all(response.as_bytes());
    let _ = writer.write_all(b"\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    fn roundtrip(path: &Path, line: &str) -> String {
        let mut stream = UnixStream::connect(path).expect("connect to control socket");
        stream.write_all(line.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut resp = String::new();
        reader.read_line(&mut resp).unwrap();
        resp.trim_end_matches(['\r', '\n']).to_string()
    }

    #[test]
    fn lifecycle_creates_and_removes_the_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let hijacker = Arc::new(hijack_core::start().expect("this test binary carries its own debug info"));

        let mut server = ControlServer::start(&path, hijacker).unwrap();
        assert!(path.exists());

        assert_eq!(roundtrip(&path, "/echo hello"), "hello");

        server.cancel();
        assert!(!path.exists());
    }
}
