//! The applier: a dedicated OS thread that serializes every code-mutating
//! operation (§4.G, §5).
//!
//! Installing, reverting, and re-applying trampolines, and the "invoke
//! original" call-through, are each funneled onto this one thread as a
//! zero-argument unit of work, and the caller blocks on a one-shot reply
//! channel for the result. This is the whole of the engine's concurrency
//! story: no locks beyond the channel, because the applier is the sole
//! writer of process code pages (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Sender};

type Job = Box<dyn FnOnce() + Send>;

/// Raised when a submission races the applier's shutdown.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The work queue was already closed, or closed before a reply arrived.
    #[error("orchestrator work queue is closed")]
    Closed,
}

/// A cloneable submission endpoint for the applier thread.
///
/// Every action factory and every call-through holds one of these; cloning
/// is cheap (an `Arc`-backed channel sender plus a shared flag) so a
/// long-lived substitute closure can keep submitting work for as long as its
/// patch remains installed.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: Sender<Job>,
    closed: Arc<AtomicBool>,
}

impl OrchestratorHandle {
    /// Run `f` on the applier thread and block the caller until it replies.
    ///
    /// This is the only suspension point external callers of `apply` share
    /// with a substitute's own call-through (§5 "Suspension points").
    pub fn enqueue_blocking<T, F>(&self, f: F) -> Result<T, OrchestratorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(OrchestratorError::Closed);
        }
        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        self.tx.send(job).map_err(|_| OrchestratorError::Closed)?;
        reply_rx.recv().map_err(|_| OrchestratorError::Closed)
    }
}

/// Owns the applier thread for the lifetime of the process (§4.G, §5).
///
/// Pinned in the sense of "one dedicated, identifiable thread" — not CPU
/// affinity. Affinity is not load-bearing here: the only invariant the
/// design needs is single-writer serialization of code-mutating work, which
/// a single OS thread gives regardless of which core it runs on (§9 Open
/// Question (a); see DESIGN.md).
pub struct Orchestrator {
    handle: OrchestratorHandle,
    cancel_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Spawn the applier thread.
    pub fn spawn() -> Self {
        let (tx, rx) = unbounded::<Job>();
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let closed = Arc::new(AtomicBool::new(false));

        let worker = thread::Builder::new()
            .name("hijack-applier".into())
            .spawn(move || loop {
                select! {
                    recv(rx) -> msg => match msg {
                        Ok(job) => job(),
                        Err(_) => break,
                    },
                    recv(cancel_rx) -> _ => break,
                }
            })
            .expect("spawning the applier thread");

        Self {
            handle: OrchestratorHandle { tx, closed },
            cancel_tx,
            worker: Some(worker),
        }
    }

    /// A cloneable handle for submitting work to this applier.
    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Close the work queue and join the worker (§5 Cancellation).
    ///
    /// Idempotent: a second call after the worker has already exited is a
    /// no-op. Pending or subsequent `enqueue_blocking` callers observe
    /// [`OrchestratorError::Closed`].
    pub fn cancel(&mut self) {
        self.handle.closed.store(true, Ordering::Release);
        let _ = self.cancel_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn enqueue_blocking_runs_on_the_applier_and_returns_the_result() {
        let orch = Orchestrator::spawn();
        let handle = orch.handle();
        let result = handle.enqueue_blocking(|| 2 + 2).expect("queue is open");
        assert_eq!(result, 4);
    }

    #[test]
    fn jobs_run_in_fifo_order() {
        let orch = Orchestrator::spawn();
        let handle = orch.handle();
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let h = handle.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                h.enqueue_blocking(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    i
                })
            }));
        }
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn cancel_closes_the_queue_and_rejects_new_submissions() {
        let mut orch = Orchestrator::spawn();
        let handle = orch.handle();
        orch.cancel();
        let err = handle.enqueue_blocking(|| ()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Closed));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut orch = Orchestrator::spawn();
        orch.cancel();
        orch.cancel();
    }
}
