use crate::types::TypeDescriptor;

/// A resolved symbol table entry (§3: Symbol).
///
/// Keyed by name; when the symbol table has two entries of the same name
/// (weak/local aliasing, rare in a statically-linked binary) the last one
/// iterated wins, matching the original's "caller qualifies with package
/// prefix" assumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Fully-qualified function name.
    pub name: String,
    /// Absolute entry address in the running process's address space.
    pub entry_address: u64,
}

/// A function's reconstructed signature (§3: FunctionSignature).
///
/// Invariant: `outputs` are exactly the formal parameters whose DWARF
/// `variable_parameter` attribute is `true`, in declaration order; `inputs`
/// are the rest, also in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// Fully-qualified function name (matches the DWARF subprogram name and
    /// the symbol table name).
    pub qualified_name: String,
    /// Input descriptors, declaration order.
    pub inputs: Vec<TypeDescriptor>,
    /// Output descriptors, declaration order.
    pub outputs: Vec<TypeDescriptor>,
}

impl FunctionSignature {
    /// Total number of machine words passed across the call boundary.
    pub fn arity(&self) -> (usize, usize) {
        (self.inputs.len(), self.outputs.len())
    }
}
