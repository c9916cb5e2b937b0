//! Error taxonomy for the action library and orchestrator (§7).
//!
//! `mprotect` failures are fatal and never surface here — `hijack-patch`
//! aborts the process directly. Everything below is recoverable and meant
//! to be rendered as one line of text by a control-surface caller.

/// Errors raised installing, releasing, or routing a hijack.
#[derive(Debug, thiserror::Error)]
pub enum HijackError {
    /// The symbol or DWARF subprogram tree lookup failed.
    #[error(transparent)]
    Resolve(#[from] hijack_resolver::ResolveError),

    /// Building the substitute's JIT stub failed.
    #[error(transparent)]
    Dispatch(#[from] hijack_dispatch::DispatchError),

    /// A second `apply` for an already-patched function (§3 Registry
    /// invariant: at most one Guard per function).
    #[error("function already patched: {0}")]
    PatchedAlready(String),

    /// Unknown action name, or a `val`/`index` that fails validation for the
    /// chosen action (e.g. a non-positive delay, an out-of-range index).
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// The applier's work queue was closed (cancellation raced the call).
    #[error("orchestrator is shutting down")]
    OrchestratorClosed,
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, HijackError>;

impl From<crate::orchestrator::OrchestratorError> for HijackError {
    fn from(_: crate::orchestrator::OrchestratorError) -> Self {
        HijackError::OrchestratorClosed
    }
}
