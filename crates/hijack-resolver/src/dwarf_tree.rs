//! DWARF Tree Builder (§4.B).
//!
//! Walks every `DW_TAG_subprogram` entry in `.debug_info` and materializes a
//! [`SubprogramTree`] keyed by the entry's fully-qualified `DW_AT_name`. The
//! tree retains the formal-parameter children (as [`ParamTree`]) needed by
//! the function-type builder; everything else under the subprogram (lexical
//! blocks, locals) is not of interest to this engine and is skipped.

use std::collections::HashMap;

use gimli::{DebuggingInformationEntry, Dwarf, EndianSlice, RunTimeEndian, Unit, UnitOffset};

use crate::error::{ResolveError, Result};

pub(crate) type R<'a> = EndianSlice<'a, RunTimeEndian>;

/// One formal-parameter child of a subprogram.
#[derive(Debug, Clone)]
pub struct ParamTree {
    /// Offset of this DIE within its compilation unit; the typecache key.
    pub offset: UnitOffset,
    /// `DW_AT_name`, when present (some compilers omit it for unused args).
    pub name: Option<String>,
    /// Offset of the referenced type DIE (`DW_AT_type`).
    pub type_offset: Option<UnitOffset>,
    /// `DW_AT_variable_parameter`: true marks this slot as an output.
    pub is_output: bool,
}

/// A subprogram entry plus its formal-parameter children (§3: a tree of
/// entry + formal-parameter children).
#[derive(Debug, Clone)]
pub struct SubprogramTree {
    /// Offset of the subprogram DIE within its unit.
    pub offset: UnitOffset,
    /// Index of the owning compilation unit in the loader's unit list.
    pub unit_index: usize,
    /// Fully-qualified function name.
    pub name: String,
    /// Formal parameters, in declaration order.
    pub children: Vec<ParamTree>,
    /// The subprogram's own `DW_AT_type` (its return type), when present.
    ///
    /// Go's DWARF emitter represents a function's return values as trailing
    /// formal-parameter children flagged `DW_AT_variable_parameter` (§4.B/§4.D);
    /// rustc instead attaches the return type directly to the subprogram DIE,
    /// the same way it would for a variable. A subprogram with no
    /// variable-parameter children falls back to this field for its single
    /// output (§4.D note; see DESIGN.md).
    pub return_type: Option<UnitOffset>,
}

/// Walk one compilation unit's entries and fold every subprogram into
/// `out`, keyed by name. Later units/entries overwrite earlier ones on a
/// name collision (last-wins, matching the Symbol table's rule in §3).
pub fn collect_subprograms<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit_index: usize,
    unit: &Unit<R<'a>>,
    out: &mut HashMap<String, SubprogramTree>,
) -> Result<()> {
    let mut tree = unit
        .entries_tree(None)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    walk_node(dwarf, unit, root, out, unit_index)
}

fn walk_node<'a, 'u>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    mut node: gimli::EntriesTreeNode<'u, '_, R<'a>>,
    out: &mut HashMap<String, SubprogramTree>,
    unit_index: usize,
) -> Result<()> {
    let entry = node.entry();
    if entry.tag() == gimli::DW_TAG_subprogram {
        if let Some(subprogram) = materialize_subprogram(dwarf, unit, entry, unit_index)? {
            out.insert(subprogram.name.clone(), subprogram);
        }
    }

    let mut children = node.children();
    while let Some(child) = children
        .next()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
    {
        walk_node(dwarf, unit, child, out, unit_index)?;
    }
    Ok(())
}

fn materialize_subprogram<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    entry: &DebuggingInformationEntry<R<'a>>,
    unit_index: usize,
) -> Result<Option<SubprogramTree>> {
    let name = match entry_name(dwarf, unit, entry)? {
        Some(n) => n,
        None => return Ok(None),
    };

    let return_type = entry
        .attr_value(gimli::DW_AT_type)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
        .and_then(|v| match v {
            gimli::AttributeValue::UnitRef(off) => Some(off),
            _ => None,
        });

    let mut children = Vec::new();
    let mut tree = unit
        .entries_tree(Some(entry.offset()))
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let mut cursor = root.children();
    while let Some(child) = cursor
        .next()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
    {
        let child_entry = child.entry();
        if child_entry.tag() != gimli::DW_TAG_formal_parameter {
            continue;
        }
        children.push(materialize_param(dwarf, unit, child_entry)?);
    }

    Ok(Some(SubprogramTree {
        offset: entry.offset(),
        unit_index,
        name,
        children,
        return_type,
    }))
}

fn materialize_param<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    entry: &DebuggingInformationEntry<R<'a>>,
) -> Result<ParamTree> {
    let name = entry_name(dwarf, unit, entry)?;
    let type_offset = entry
        .attr_value(gimli::DW_AT_type)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
        .and_then(|v| match v {
            gimli::AttributeValue::UnitRef(off) => Some(off),
            _ => None,
        });
    let is_output = entry
        .attr_value(gimli::DW_AT_variable_parameter)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
        .and_then(|v| v.udata_value())
        .map(|v| v != 0)
        .unwrap_or(false);

    Ok(ParamTree {
        offset: entry.offset(),
        name,
        type_offset,
        is_output,
    })
}

fn entry_name<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    entry: &DebuggingInformationEntry<R<'a>>,
) -> Result<Option<String>> {
    let attr = entry
        .attr_value(gimli::DW_AT_name)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let Some(attr) = attr else { return Ok(None) };
    match dwarf.attr_string(unit, attr) {
        Ok(s) => Ok(Some(String::from_utf8_lossy(s.slice()).into_owned())),
        Err(e) => Err(ResolveError::DwarfRead(e.to_string())),
    }
}
