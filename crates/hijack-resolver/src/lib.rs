//! Symbol & Type Resolver (§4.A–§4.D of the hijack engine spec).
//!
//! Parses the host binary's symbol table and DWARF debug info once at
//! startup, and resolves a function name into its entry address plus a
//! synthesized [`FunctionSignature`] on demand. Everything here is
//! load-time-immutable; see [`Resolver::load`] for the one-shot entry
//! point.

mod dwarf_tree;
mod error;
mod loader;
mod signature;
mod synth;
mod types;

pub use error::{ResolveError, Result};
pub use signature::{FunctionSignature, Symbol};
pub use synth::TypeCache;
pub use types::{Field, ScalarKind, TypeDescriptor};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use dwarf_tree::{collect_subprograms, SubprogramTree};
use gimli::{Dwarf, EndianSlice, RunTimeEndian, Unit};
use loader::LoadedBinary;

/// The resolved view of the host binary: symbol map plus DWARF subprogram
/// trees, keyed by fully-qualified function name.
pub struct Resolver {
    symbols: HashMap<String, Symbol>,
    units: Vec<Unit<EndianSlice<'static, RunTimeEndian>>>,
    dwarf: Dwarf<EndianSlice<'static, RunTimeEndian>>,
    subprograms: HashMap<String, SubprogramTree>,
    // The typecache must tolerate concurrent resolves from request-handling
    // threads even though mutation (registry, patching) is serialized onto
    // the applier; a plain mutex is enough since resolution is cheap and
    // rare compared to patch application.
    typecache: Mutex<TypeCache>,
}

impl Resolver {
    /// Load and index `/proc/<pid>/exe` (§4.A `Open` + §4.B tree build).
    pub fn from_self_exe() -> Result<Self> {
        Self::load(&loader::self_exe_path())
    }

    /// Load and index the ELF+DWARF image at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let LoadedBinary { symbols, dwarf } = loader::load(path)?;

        let mut units = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers
            .next()
            .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
        {
            let unit = dwarf
                .unit(header)
                .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
            units.push(unit);
        }

        let mut subprograms = HashMap::new();
        for (index, unit) in units.iter().enumerate() {
            collect_subprograms(&dwarf, index, unit, &mut subprograms)?;
        }

        Ok(Self {
            symbols,
            units,
            dwarf,
            subprograms,
            typecache: Mutex::new(TypeCache::new()),
        })
    }

    /// All known symbol names (§4.G `Funcs`).
    pub fn funcs(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }

    /// Resolve `name` to its symbol and synthesized function signature.
    ///
    /// Fails with [`ResolveError::PointNotFound`] if either lookup misses,
    /// or [`ResolveError::UnsupportedType`] if any parameter's type cannot
    /// be synthesized (§8 testable property 5: never a silent drop).
    pub fn resolve(&self, name: &str) -> Result<(Symbol, FunctionSignature)> {
        let symbol = self
            .symbols
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::PointNotFound(name.to_string()))?;
        let tree = self
            .subprograms
            .get(name)
            .ok_or_else(|| ResolveError::PointNotFound(name.to_string()))?;
        let unit = &self.units[tree.unit_index];

        let mut cache = self.typecache.lock().expect("typecache mutex poisoned");
        let signature = synth::build_signature(&self.dwarf, unit, tree.unit_index, tree, &mut cache)?;
        Ok((symbol, signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funcs_empty_resolver_errors_on_missing_binary() {
        let missing = Path::new("/nonexistent/definitely-not-a-binary");
        let err = Resolver::load(missing).unwrap_err();
        assert!(matches!(err, ResolveError::LoadFailed { .. }));
    }
}
