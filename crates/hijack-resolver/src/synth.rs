//! Type Synthesizer (§4.C) and Function-Type Builder (§4.D).

use std::collections::HashSet;

use gimli::{DebuggingInformationEntry, Dwarf, Unit, UnitOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::dwarf_tree::{ParamTree, SubprogramTree, R};
use crate::error::{ResolveError, Result};
use crate::signature::FunctionSignature;
use crate::types::{Field, ScalarKind, TypeDescriptor};

/// Names whose pointee collapses a pointer type to [`TypeDescriptor::OpaqueHandle`]
/// (§4.C: "`Pointer` named `unsafe.Pointer` collapses to an opaque word-sized
/// handle"). `unsafe.Pointer` is kept verbatim for fidelity with the source
/// this engine generalizes from; the others are this reimplementation's
/// equivalent for a Rust debuggee (see DESIGN.md).
const OPAQUE_POINTEE_NAMES: &[&str] = &["unsafe.Pointer", "c_void", "core::ffi::c_void", "std::ffi::c_void"];

/// Names whose pointee marks a pointer as this engine's `ScalarKind::String`
/// carrier. A plain `type c_char = i8;` alias leaves no trace of itself in
/// DWARF — the pointee DIE reads exactly like any other `i8`/`u8` base
/// type — so the base type's own name is the only signal left. Every
/// `extern "C"` hijack target in this corpus returns its text as
/// `*mut c_char`/`*const c_char` for exactly that reason: a 24-byte `String`
/// return needs a hidden sret pointer the JIT entry stub does not model,
/// while a single-byte-pointee pointer is always one register, sret or not
/// (see DESIGN.md).
const C_STRING_POINTEE_NAMES: &[&str] = &["i8", "u8"];

/// Per debug-info-offset cache of already-synthesized types (§3: Typecache).
/// Lifetime is process-lifetime: the DWARF arena is immutable after load, so
/// entries never need invalidating.
pub struct TypeCache {
    by_offset: FxHashMap<(usize, UnitOffset), TypeDescriptor>,
}

impl TypeCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            by_offset: FxHashMap::default(),
        }
    }
}

impl Default for TypeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Regex recovering a function type's return clause from its textual
/// signature, mirroring the source's `^func\(.*?\)(?P<ret>.+)$` workaround
/// for debug-info formats (DWARF included) that do not mark a clean
/// input/output boundary on subroutine types (§4.C "Function-type quirk").
static FUNC_SIG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^fn\(.*?\)(?:\s*->\s*(?P<ret>.+))?$").expect("static regex is valid")
});

/// Translate one DWARF type DIE into a [`TypeDescriptor`] (§4.C).
///
/// `in_progress` breaks structural recursion for self-referential structs
/// (a struct containing a pointer back to itself): once an offset is seen
/// again while still being resolved, the policy is to emit an opaque
/// pointer placeholder rather than fail or loop forever — see DESIGN.md's
/// Open Question resolution for the cyclic-type policy knob §4.C/§9 call out.
pub fn make_type<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    offset: UnitOffset,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<TypeDescriptor> {
    let key = (unit_index, offset);
    if let Some(cached) = cache.by_offset.get(&key) {
        return Ok(cached.clone());
    }
    if in_progress.contains(&key) {
        return Ok(TypeDescriptor::Pointer(Box::new(TypeDescriptor::OpaqueHandle)));
    }

    let entry = unit
        .entry(offset)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;

    in_progress.insert(key);
    let result = make_type_inner(dwarf, unit, unit_index, &entry, cache, in_progress);
    in_progress.remove(&key);

    let descriptor = result?;
    cache.by_offset.insert(key, descriptor.clone());
    Ok(descriptor)
}

fn make_type_inner<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    entry: &DebuggingInformationEntry<R<'a>>,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<TypeDescriptor> {
    match entry.tag() {
        gimli::DW_TAG_typedef | gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type => {
            let elem = referenced_type(dwarf, unit, unit_index, entry, cache, in_progress)?;
            Ok(elem)
        }

        gimli::DW_TAG_pointer_type => {
            let pointee_offset = type_attr_offset(entry)?;
            if let Some(pointee_offset) = pointee_offset {
                if pointee_is_opaque(dwarf, unit, pointee_offset)? {
                    return Ok(TypeDescriptor::OpaqueHandle);
                }
                if pointee_is_c_string(dwarf, unit, pointee_offset)? {
                    return Ok(TypeDescriptor::Scalar(ScalarKind::String));
                }
                let elem = make_type(dwarf, unit, unit_index, pointee_offset, cache, in_progress)?;
                Ok(TypeDescriptor::Pointer(Box::new(elem)))
            } else {
                // `*const ()` / raw void pointer with no DW_AT_type.
                Ok(TypeDescriptor::OpaqueHandle)
            }
        }

        gimli::DW_TAG_structure_type => synth_struct(dwarf, unit, unit_index, entry, cache, in_progress),

        gimli::DW_TAG_array_type => {
            let elem_offset = type_attr_offset(entry)?.ok_or_else(|| {
                ResolveError::UnsupportedType("array type missing element type".into())
            })?;
            let elem = make_type(dwarf, unit, unit_index, elem_offset, cache, in_progress)?;
            Ok(TypeDescriptor::Slice(Box::new(elem)))
        }

        gimli::DW_TAG_base_type => synth_base(dwarf, unit, entry),

        gimli::DW_TAG_subroutine_type => synth_func(dwarf, unit, unit_index, entry, cache, in_progress),

        other => Err(ResolveError::UnsupportedType(format!("{other}"))),
    }
}

fn referenced_type<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    entry: &DebuggingInformationEntry<R<'a>>,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<TypeDescriptor> {
    match type_attr_offset(entry)? {
        Some(off) => make_type(dwarf, unit, unit_index, off, cache, in_progress),
        None => Err(ResolveError::UnsupportedType(
            "typedef/cv-qualifier missing DW_AT_type".into(),
        )),
    }
}

fn type_attr_offset<'a>(entry: &DebuggingInformationEntry<R<'a>>) -> Result<Option<UnitOffset>> {
    let value = entry
        .attr_value(gimli::DW_AT_type)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    Ok(value.and_then(|v| match v {
        gimli::AttributeValue::UnitRef(off) => Some(off),
        _ => None,
    }))
}

fn die_name<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    entry: &DebuggingInformationEntry<R<'a>>,
) -> Result<Option<String>> {
    let attr = entry
        .attr_value(gimli::DW_AT_name)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    match attr {
        Some(v) => match dwarf.attr_string(unit, v) {
            Ok(s) => Ok(Some(String::from_utf8_lossy(s.slice()).into_owned())),
            Err(e) => Err(ResolveError::DwarfRead(e.to_string())),
        },
        None => Ok(None),
    }
}

fn pointee_is_opaque<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    pointee_offset: UnitOffset,
) -> Result<bool> {
    let pointee = unit
        .entry(pointee_offset)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    match die_name(dwarf, unit, &pointee)? {
        Some(name) => Ok(OPAQUE_POINTEE_NAMES.contains(&name.as_str())),
        None => Ok(false),
    }
}

fn pointee_is_c_string<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    pointee_offset: UnitOffset,
) -> Result<bool> {
    let pointee = unit
        .entry(pointee_offset)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    if pointee.tag() != gimli::DW_TAG_base_type {
        return Ok(false);
    }
    match die_name(dwarf, unit, &pointee)? {
        Some(name) => Ok(C_STRING_POINTEE_NAMES.contains(&name.as_str())),
        None => Ok(false),
    }
}

fn synth_struct<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    entry: &DebuggingInformationEntry<R<'a>>,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<TypeDescriptor> {
    // Rust DWARF has no native map/chan tags; generic container names are
    // sniffed from the struct's own DW_AT_name the way the spec's Go source
    // relies on dedicated Map/Chan DWARF tags. See DESIGN.md.
    if let Some(name) = die_name(dwarf, unit, entry)? {
        if name.starts_with("HashMap<") || name.starts_with("BTreeMap<") {
            let (key, elem) = struct_first_two_field_types(dwarf, unit, unit_index, entry, cache, in_progress)?;
            return Ok(TypeDescriptor::Map {
                key: Box::new(key),
                elem: Box::new(elem),
            });
        }
        if name.starts_with("Receiver<") || name.starts_with("Sender<") || name.starts_with("Channel<") {
            let elem = struct_first_field_type(dwarf, unit, unit_index, entry, cache, in_progress)?
                .unwrap_or(TypeDescriptor::OpaqueHandle);
            return Ok(TypeDescriptor::Chan(Box::new(elem)));
        }
        if name.starts_with("dyn ") {
            return Ok(TypeDescriptor::Interface);
        }
    }

    let mut fields = Vec::new();
    let mut tree = unit
        .entries_tree(Some(entry.offset()))
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children
        .next()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
    {
        let member = child.entry();
        if member.tag() != gimli::DW_TAG_member {
            continue;
        }
        let field_name = die_name(dwarf, unit, member)?.unwrap_or_else(|| "_".to_string());
        let field_offset = type_attr_offset(member)?.ok_or_else(|| {
            ResolveError::UnsupportedType(format!("struct field {field_name} missing type"))
        })?;
        let ty = make_type(dwarf, unit, unit_index, field_offset, cache, in_progress)?;
        fields.push(Field {
            name: title_case(&field_name),
            ty: Box::new(ty),
        });
    }

    Ok(TypeDescriptor::Struct { fields })
}

fn struct_first_field_type<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    entry: &DebuggingInformationEntry<R<'a>>,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<Option<TypeDescriptor>> {
    let mut tree = unit
        .entries_tree(Some(entry.offset()))
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children
        .next()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
    {
        let member = child.entry();
        if member.tag() != gimli::DW_TAG_member {
            continue;
        }
        if let Some(off) = type_attr_offset(member)? {
            return Ok(Some(make_type(dwarf, unit, unit_index, off, cache, in_progress)?));
        }
    }
    Ok(None)
}

fn struct_first_two_field_types<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    entry: &DebuggingInformationEntry<R<'a>>,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<(TypeDescriptor, TypeDescriptor)> {
    let mut out = Vec::new();
    let mut tree = unit
        .entries_tree(Some(entry.offset()))
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children
        .next()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
    {
        let member = child.entry();
        if member.tag() != gimli::DW_TAG_member {
            continue;
        }
        if let Some(off) = type_attr_offset(member)? {
            out.push(make_type(dwarf, unit, unit_index, off, cache, in_progress)?);
        }
        if out.len() == 2 {
            break;
        }
    }
    while out.len() < 2 {
        out.push(TypeDescriptor::OpaqueHandle);
    }
    Ok((out.remove(0), out.remove(0)))
}

fn synth_base<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    entry: &DebuggingInformationEntry<R<'a>>,
) -> Result<TypeDescriptor> {
    let name = die_name(dwarf, unit, entry)?.unwrap_or_default();
    if name == "&str" || name == "str" || name == "String" || name == "alloc::string::String" {
        return Ok(TypeDescriptor::Scalar(ScalarKind::String));
    }

    let encoding = entry
        .attr_value(gimli::DW_AT_encoding)
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
        .and_then(|v| v.udata_value())
        .map(|v| gimli::DwAte(v as u8));

    match encoding {
        Some(gimli::DW_ATE_boolean) => Ok(TypeDescriptor::Scalar(ScalarKind::Bool)),
        Some(gimli::DW_ATE_signed) | Some(gimli::DW_ATE_signed_char) => {
            Ok(TypeDescriptor::Scalar(ScalarKind::Int))
        }
        Some(gimli::DW_ATE_unsigned) | Some(gimli::DW_ATE_unsigned_char) => {
            Ok(TypeDescriptor::Scalar(ScalarKind::Uint))
        }
        _ => Err(ResolveError::UnsupportedType(format!(
            "base type `{name}` has unsupported encoding"
        ))),
    }
}

fn synth_func<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    entry: &DebuggingInformationEntry<R<'a>>,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<TypeDescriptor> {
    let mut params = Vec::new();
    let mut tree = unit
        .entries_tree(Some(entry.offset()))
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children
        .next()
        .map_err(|e| ResolveError::DwarfRead(e.to_string()))?
    {
        let param = child.entry();
        if param.tag() != gimli::DW_TAG_formal_parameter {
            continue;
        }
        if let Some(off) = type_attr_offset(param)? {
            params.push(make_type(dwarf, unit, unit_index, off, cache, in_progress)?);
        }
    }

    // Recover the return arity from the textual signature, per the
    // "function-type quirk" (§4.C): outputs are the tail `ret_arity`
    // params, each one pointer-wrapped in debug info and unwrapped here.
    let sig_text = die_name(dwarf, unit, entry)?.unwrap_or_default();
    let ret_arity = FUNC_SIG_RE
        .captures(&sig_text)
        .and_then(|c| c.name("ret"))
        .map(|m| m.as_str().split(',').filter(|s| !s.trim().is_empty()).count())
        .unwrap_or(0);

    let split_at = params.len().saturating_sub(ret_arity);
    let mut outputs: Vec<TypeDescriptor> = params.split_off(split_at);
    let inputs = params;

    for out in outputs.iter_mut() {
        if let TypeDescriptor::Pointer(inner) = out {
            *out = (**inner).clone();
        }
    }

    Ok(TypeDescriptor::Func { inputs, outputs })
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Function-Type Builder (§4.D): convert a [`SubprogramTree`] into a
/// [`FunctionSignature`] by resolving each formal parameter's type through
/// the cache and partitioning on `is_output`.
///
/// §4.D partitions strictly on the `variable-parameter` attribute, which is
/// how Go's DWARF emitter (the source this engine generalizes) represents
/// return values: as trailing formal parameters. rustc never sets that
/// attribute — a Rust function's return type lives on the subprogram DIE's
/// own `DW_AT_type` instead, the same place a variable's type would be. When
/// no child is flagged as an output, this builder falls back to that single
/// subprogram-level return type, so the partitioning rule still yields the
/// correct signature for a Rust debuggee (DESIGN.md's Open Question
/// resolution for "function-type quirk" §4.C/§4.D).
pub fn build_signature<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    tree: &SubprogramTree,
    cache: &mut TypeCache,
) -> Result<FunctionSignature> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut in_progress = HashSet::new();

    for param in &tree.children {
        let ty = resolve_param(dwarf, unit, unit_index, param, cache, &mut in_progress)?;
        if param.is_output {
            outputs.push(ty);
        } else {
            inputs.push(ty);
        }
    }

    if outputs.is_empty() {
        if let Some(offset) = tree.return_type {
            let ty = make_type(dwarf, unit, unit_index, offset, cache, &mut in_progress)?;
            outputs.extend(flatten_tuple_return(ty));
        }
    }

    Ok(FunctionSignature {
        qualified_name: tree.name.clone(),
        inputs,
        outputs,
    })
}

/// rustc never sets `DW_AT_variable_parameter` (§4.D's partitioning
/// attribute comes from the source's Go DWARF emitter), so a Rust
/// subprogram's return value is always exactly one DIE — even for a
/// multi-value return like `fn f() -> (String, Option<String>)`, which
/// rustc represents as a single anonymous tuple struct whose members are
/// named `__0`, `__1`, ... in declaration order.
///
/// To keep the `outputs: Vec<TypeDescriptor>` / per-index `set`/`return`
/// addressing this engine inherits from the Go source working for such
/// functions (§3 FunctionSignature, §8 S5 "two-return with error"), a
/// top-level tuple return is flattened into one output per tuple slot
/// instead of being kept as a single `Struct` output. Any other struct
/// return type (named fields, not `__N`) is left as one output, since it
/// is a genuine single value rather than a multi-return tuple.
fn flatten_tuple_return(ty: TypeDescriptor) -> Vec<TypeDescriptor> {
    match &ty {
        TypeDescriptor::Struct { fields } if !fields.is_empty() && is_tuple_shaped(fields) => {
            let TypeDescriptor::Struct { fields } = ty else { unreachable!() };
            fields.into_iter().map(|f| *f.ty).collect()
        }
        _ => vec![ty],
    }
}

fn is_tuple_shaped(fields: &[Field]) -> bool {
    fields
        .iter()
        .enumerate()
        .all(|(i, f)| f.name.eq_ignore_ascii_case(&format!("__{i}")))
}

fn resolve_param<'a>(
    dwarf: &Dwarf<R<'a>>,
    unit: &Unit<R<'a>>,
    unit_index: usize,
    param: &ParamTree,
    cache: &mut TypeCache,
    in_progress: &mut HashSet<(usize, UnitOffset)>,
) -> Result<TypeDescriptor> {
    let offset = param.type_offset.ok_or_else(|| {
        ResolveError::UnsupportedType(format!(
            "parameter {} missing DW_AT_type",
            param.name.as_deref().unwrap_or("<unnamed>")
        ))
    })?;
    make_type(dwarf, unit, unit_index, offset, cache, in_progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple_field(index: usize, ty: TypeDescriptor) -> Field {
        Field {
            name: format!("__{index}"),
            ty: Box::new(ty),
        }
    }

    #[test]
    fn flattens_a_tuple_shaped_struct_into_one_output_per_slot() {
        let tuple = TypeDescriptor::Struct {
            fields: vec![
                tuple_field(0, TypeDescriptor::Scalar(ScalarKind::String)),
                tuple_field(1, TypeDescriptor::Interface),
            ],
        };
        let outputs = flatten_tuple_return(tuple);
        assert_eq!(
            outputs,
            vec![
                TypeDescriptor::Scalar(ScalarKind::String),
                TypeDescriptor::Interface,
            ]
        );
    }

    #[test]
    fn leaves_a_named_struct_as_a_single_output() {
        let named = TypeDescriptor::Struct {
            fields: vec![Field {
                name: "Code".to_string(),
                ty: Box::new(TypeDescriptor::Scalar(ScalarKind::Int)),
            }],
        };
        let outputs = flatten_tuple_return(named.clone());
        assert_eq!(outputs, vec![named]);
    }

    #[test]
    fn leaves_a_non_struct_return_as_a_single_output() {
        let scalar = TypeDescriptor::Scalar(ScalarKind::Int);
        assert_eq!(flatten_tuple_return(scalar.clone()), vec![scalar]);
    }
}
