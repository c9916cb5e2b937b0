//! The orchestrator-facing facade every external caller (a control-surface
//! handler, an embedding host) drives (§4.G registry operations).

use std::sync::Arc;

use hijack_dispatch::Dispatcher;
use hijack_resolver::Resolver;

use crate::actions;
use crate::error::{HijackError, Result};
use crate::orchestrator::Orchestrator;
use crate::point::HijackPoint;
use crate::registry::Registry;

/// Bootstraps the resolver and the applier (§6 Bootstrap API, the
/// `hijack-core` half of it — see DESIGN.md for why the control surface's
/// half of `start()` lives in `hijack-cli` instead).
///
/// Fails with a resolver [`HijackError::Resolve`] (`LoadFailed`) if the
/// host's own executable image cannot be parsed for symbols and debug info
/// (§7: fatal at startup).
pub fn start() -> Result<Hijacker> {
    let resolver = Resolver::from_self_exe()?;
    let dispatcher = Arc::new(Dispatcher::new()?);
    let orchestrator = Orchestrator::spawn();
    let registry = Registry::new();
    Ok(Hijacker {
        resolver,
        dispatcher,
        orchestrator,
        registry,
    })
}

/// Owns the resolved binary, the JIT dispatcher, the applier thread, and the
/// patch registry for one process's lifetime.
///
/// `dispatcher` is `Arc`-wrapped so a job enqueued onto the applier thread
/// (which must be `'static`, since it may outlive the `apply`/`release` call
/// that enqueued it) can hold its own owning handle rather than borrowing
/// from `&self`.
pub struct Hijacker {
    resolver: Resolver,
    dispatcher: Arc<Dispatcher>,
    orchestrator: Orchestrator,
    registry: Registry,
}

impl Hijacker {
    /// Install `point` (§4.G `apply`).
    ///
    /// Checks the registry for an existing entry under `point.func` first
    /// (§3 Registry invariant), then enqueues the action factory onto the
    /// applier and blocks for the result; on success the new guard is
    /// recorded under `point.func`.
    pub fn apply(&self, point: HijackPoint) -> Result<()> {
        if self.registry.contains(&point.func) {
            return Err(HijackError::PatchedAlready(point.func));
        }

        let (symbol, signature) = self.resolver.resolve(&point.func)?;
        let func_name = point.func.clone();
        let dispatcher = self.dispatcher.clone();
        let orchestrator_handle = self.orchestrator.handle();
        let orchestrator_for_job = self.orchestrator.handle();

        let patch = orchestrator_for_job.enqueue_blocking(move || {
            actions::install(&dispatcher, orchestrator_handle, &symbol, &signature, &point)
        })??;

        self.registry.insert(func_name, patch);
        Ok(())
    }

    /// Lift the patch on `name`, if any (§4.G `release`). Case-insensitive,
    /// idempotent no-op on an absent name (§8 property 3).
    pub fn release(&self, name: &str) {
        if let Some(patch) = self.registry.remove_case_insensitive(name) {
            let guard = patch.guard.clone();
            let _ = self.orchestrator.handle().enqueue_blocking(move || {
                guard.unpatch();
            });
            // The JIT stub's closure can be dropped once nothing will call
            // into it again; safe to release off the applier thread since it
            // only touches `hijack-dispatch`'s own registry, not code pages.
            self.dispatcher.release_id(patch.stub_id);
        }
    }

    /// All known symbol names (§4.G `funcs`).
    pub fn funcs(&self) -> Vec<String> {
        self.resolver.funcs()
    }

    /// Currently-installed function names (§4.G `points`).
    pub fn points(&self) -> Vec<String> {
        self.registry.points()
    }

    /// Shut down the applier thread (§5 Cancellation).
    pub fn cancel(&mut self) {
        self.orchestrator.cancel();
    }
}
