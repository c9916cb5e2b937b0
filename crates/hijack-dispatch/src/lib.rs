//! Reflective function-type synthesizer runtime (§9).
//!
//! Where [`hijack_resolver`] reconstructs a [`hijack_resolver::FunctionSignature`]
//! from debug info, this crate turns that signature into something callable:
//! a cranelift-JIT'd native entry point whose prologue can be installed over
//! the real function's (by [`hijack_patch`]) and whose body marshals raw
//! machine words into the [`DynValue`] view a substitute closure reads and
//! writes.

mod error;
mod heap;
mod stub;
mod value;

pub use error::{DispatchError, Result};
pub use heap::ValueHeap;
pub use stub::{CallerThunk, Dispatcher, Stub, Substitute};
pub use value::{word_to_value, value_to_word, DynValue};
