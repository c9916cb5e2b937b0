use std::path::PathBuf;

/// Errors produced while loading the host binary or resolving a function's
/// symbol/type information.
///
/// `LoadFailed` is fatal at startup (propagated by `start()`); the others are
/// recoverable and surfaced to a hijack request as ordinary text.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The host's own executable image could not be opened, parsed as ELF,
    /// or was missing a symbol table / debug-info section.
    #[error("failed to load {path}: {cause}")]
    LoadFailed {
        /// Path that was opened (normally `/proc/<pid>/exe`).
        path: PathBuf,
        /// Human-readable cause.
        cause: String,
    },

    /// A named function is absent from either the symbol map or the DWARF
    /// subprogram tree (or both).
    #[error("function point not found: {0}")]
    PointNotFound(String),

    /// A debug-info type node uses a DWARF construct the synthesizer does
    /// not know how to translate into a `TypeDescriptor`.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Reading the DWARF entry tree failed (I/O or malformed section).
    #[error("dwarf read error: {0}")]
    DwarfRead(String),
}

/// Result alias used throughout the resolver.
pub type Result<T> = std::result::Result<T, ResolveError>;
