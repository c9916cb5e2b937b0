//! Binary Loader (§4.A).
//!
//! Opens the host process's own executable image, exposes a symbol map and
//! a DWARF reader. Runs once at startup; everything it hands back is
//! immutable for the remainder of the process's life, so the backing file
//! bytes are leaked into a `'static` slice rather than threaded through a
//! self-referential struct — the loader itself is not meant to be called
//! twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gimli::{Dwarf, EndianSlice, RunTimeEndian};
use object::{Object, ObjectSymbol};

use crate::error::{ResolveError, Result};
use crate::signature::Symbol;

/// Default path for the host's own executable image under Linux's `/proc`.
pub fn self_exe_path() -> PathBuf {
    PathBuf::from(format!("/proc/{}/exe", std::process::id()))
}

/// Everything the resolver needs from the host binary: its symbol map and
/// a parsed DWARF tree, both borrowed from a leaked, process-lifetime
/// buffer.
pub struct LoadedBinary {
    /// Symbol name -> entry address (§3 Symbol; last-wins on collision).
    pub symbols: HashMap<String, Symbol>,
    /// Parsed DWARF sections, ready for unit iteration.
    pub dwarf: Dwarf<EndianSlice<'static, RunTimeEndian>>,
}

/// Open and parse the binary at `path` (§4.A `Open`/symbol+DWARF extraction).
///
/// Fails with [`ResolveError::LoadFailed`] if the file cannot be opened, is
/// not a supported object format, has no symbol table, or has no DWARF
/// debug info.
pub fn load(path: &Path) -> Result<LoadedBinary> {
    let bytes = std::fs::read(path).map_err(|e| ResolveError::LoadFailed {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;
    // Process-lifetime buffer: the loader runs once, and `object`/`gimli`
    // both borrow from it for as long as the resolver is in use.
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());

    let file = object::File::parse(bytes).map_err(|e| ResolveError::LoadFailed {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;

    let mut symbols = HashMap::new();
    for sym in file.symbols() {
        let Ok(name) = sym.name() else { continue };
        if name.is_empty() {
            continue;
        }
        symbols.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                entry_address: sym.address(),
            },
        );
    }
    if symbols.is_empty() {
        return Err(ResolveError::LoadFailed {
            path: path.to_path_buf(),
            cause: "no symbol table".into(),
        });
    }

    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> std::result::Result<EndianSlice<'static, RunTimeEndian>, object::Error> {
        use object::ObjectSection;
        let data = match file.section_by_name(id.name()) {
            Some(section) => section.uncompressed_data()?,
            None => std::borrow::Cow::Borrowed(&[][..]),
        };
        // Sections from a `'static` file buffer are themselves `'static`
        // except when decompression allocates a fresh owned buffer; that
        // path is rare for debug sections in a statically-linked binary
        // and, when hit, is deliberately leaked too so the slice stays
        // valid for the loader's documented process-lifetime contract.
        let data: &'static [u8] = match data {
            std::borrow::Cow::Borrowed(d) => d,
            std::borrow::Cow::Owned(d) => Box::leak(d.into_boxed_slice()),
        };
        Ok(EndianSlice::new(data, endian))
    };

    let dwarf = Dwarf::load(load_section).map_err(|e| ResolveError::LoadFailed {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;

    let has_units = dwarf
        .units()
        .next()
        .map_err(|e| ResolveError::LoadFailed {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?
        .is_some();
    if !has_units {
        return Err(ResolveError::LoadFailed {
            path: path.to_path_buf(),
            cause: "no debug info".into(),
        });
    }

    Ok(LoadedBinary { symbols, dwarf })
}
