use thiserror::Error;

/// Errors raised building or invoking a dispatch stub.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Cranelift IR/ISA setup failed (host architecture unsupported, flag
    /// rejected, etc).
    #[error("cranelift setup failed: {0}")]
    Codegen(String),
    /// A stub, or the module backing it, could not be defined or finalized.
    #[error("stub build failed: {0}")]
    Build(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
