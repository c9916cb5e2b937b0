//! Cranelift-JIT trampoline generator (§9's "reflective function-type
//! synthesizer" runtime).
//!
//! Every hijack needs a native entry point shaped like the target's real
//! signature that, instead of running the target's body, calls into a Rust
//! closure. [`Dispatcher::build_entry_stub`] synthesizes exactly that: a
//! tiny function, JIT'd on the spot, whose only job is to gather its
//! incoming words into a stack array, hand them to a fixed-signature Rust
//! callback, and return whatever that callback wrote into a second array.
//!
//! The mirror operation, [`Dispatcher::build_caller_thunk`], is used by the
//! invoke-original call-through (§4.G): given a target's raw entry address
//! and arity, it builds a stub that does the opposite marshaling — accept a
//! uniform `(args, n_in, outs, n_out)` call and place a genuine native call
//! to that address.
//!
//! Both directions share one invariant: every call-boundary slot is one
//! `i64` word (§3's word-width policy), so the stub body never branches on
//! a [`hijack_resolver::TypeDescriptor`] — only arity drives codegen. Typed
//! marshaling happens in Rust, on either side of the JIT boundary, in
//! [`crate::value`]. That invariant only holds because every hijackable
//! target's own signature is itself genuinely word-per-slot: `extern "C"`
//! functions returning text hand back a `*mut c_char` rather than a 24-byte
//! `String`, so neither stub ever has to model a hidden sret return pointer
//! (see DESIGN.md).

use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, StackSlotData, StackSlotKind};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use dashmap::DashMap;
use once_cell::sync::Lazy;

use hijack_resolver::{FunctionSignature, TypeDescriptor};

use crate::error::{DispatchError, Result};
use crate::heap::ValueHeap;
use crate::value::{value_to_word, word_to_value, DynValue};

/// A closure a substitute action installs: reads the hijacked call's
/// arguments, returns its results, both already unmarshaled into
/// [`DynValue`]s.
pub type Substitute = Arc<dyn Fn(&[DynValue]) -> Vec<DynValue> + Send + Sync>;

struct StubEntry {
    inputs: Vec<TypeDescriptor>,
    outputs: Vec<TypeDescriptor>,
    closure: Substitute,
    heap: Arc<ValueHeap>,
}

static REGISTRY: Lazy<DashMap<u64, StubEntry>> = Lazy::new(DashMap::new);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Rust-side landing pad every JIT'd entry stub calls into. Fixed signature
/// regardless of the hijacked function's real arity: the stub's only
/// per-signature-specific work is gathering/scattering these two arrays.
///
/// `extern "C-unwind"`, not plain `extern "C"`: a `panic` action's
/// substitute closure panics on purpose (§4.F), and that panic has to
/// unwind out through this frame to reach the real caller's own
/// `catch_unwind` (§7). A plain `extern "C"` boundary aborts the process the
/// instant a panic tries to cross it; `C-unwind` is the ABI that says this
/// boundary is safe to unwind through. The JIT'd frame between this
/// function and the real caller still needs its own unwind info for the
/// stack walk to get past it — see `Dispatcher::new`'s `unwind_info` flag.
extern "C-unwind" fn hijack_dispatch_entry(ctx: i64, args_ptr: *const i64, n_in: i64, outs_ptr: *mut i64, n_out: i64) {
    let id = ctx as u64;
    let Some(entry) = REGISTRY.get(&id) else {
        tracing::error!(stub = id, "dispatch entry invoked for an unregistered stub id");
        std::process::abort();
    };

    let args = unsafe { slice::from_raw_parts(args_ptr, n_in.max(0) as usize) };
    let inputs: Vec<DynValue> = entry
        .inputs
        .iter()
        .zip(args.iter())
        .map(|(desc, &word)| word_to_value(word, desc, &entry.heap))
        .collect();

    let outputs = (entry.closure)(&inputs);

    let out_words = unsafe { slice::from_raw_parts_mut(outs_ptr, n_out.max(0) as usize) };
    for (slot, (desc, value)) in out_words.iter_mut().zip(entry.outputs.iter().zip(outputs.iter())) {
        *slot = value_to_word(value, desc, &entry.heap);
    }
}

/// A built entry stub: a native code address ready to be installed over a
/// target's prologue with `hijack_patch::patch_direct`.
pub struct Stub {
    /// Registry id; release drops this entry's closure.
    pub id: u64,
    /// The JIT'd entry point.
    pub code_ptr: *const u8,
}

// The raw pointer is into JIT-allocated, process-lifetime executable
// memory; it never aliases mutable Rust state and is only ever read as a
// call target.
unsafe impl Send for Stub {}
unsafe impl Sync for Stub {}

/// A built call-through thunk: marshals a uniform `(args, outs)` call into
/// a genuine native call at a fixed target address (§4.G invoke-original).
/// `C-unwind` for the same reason as `hijack_dispatch_entry`: the original
/// function this thunk calls is ordinary Rust code and may itself panic, and
/// that panic must be able to unwind back out through the thunk.
pub type CallerThunk = unsafe extern "C-unwind" fn(*const i64, usize, *mut i64, usize);

/// Owns the JIT module backing every stub this process builds. One
/// `Dispatcher` is created at startup and lives for the process's life,
/// mirroring the resolver's own load-once/use-forever shape.
pub struct Dispatcher {
    module: Mutex<JITModule>,
    heap: Arc<ValueHeap>,
}

impl Dispatcher {
    /// Build a dispatcher targeting the host ISA.
    pub fn new() -> Result<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| DispatchError::Codegen(e.to_string()))?;
        // Every JIT'd stub sits between a real caller and `hijack_dispatch_entry`;
        // a `panic` action's substitute unwinds through that stub's own frame
        // (§7), which only works if the stub carries real CFI unwind info for
        // the system unwinder to walk. Without this, unwinding through
        // JIT-generated code is UB and aborts the process instead of reaching
        // the caller's `catch_unwind`.
        flag_builder
            .set("unwind_info", "true")
            .map_err(|e| DispatchError::Codegen(e.to_string()))?;
        let isa_builder =
            cranelift_native::builder().map_err(|e| DispatchError::Codegen(e.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| DispatchError::Codegen(e.to_string()))?;

        let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        jit_builder.symbol("hijack_dispatch_entry", hijack_dispatch_entry as *const u8);
        let module = JITModule::new(jit_builder);

        Ok(Self {
            module: Mutex::new(module),
            heap: Arc::new(ValueHeap::new()),
        })
    }

    /// The value heap every stub built by this dispatcher shares.
    pub fn heap(&self) -> Arc<ValueHeap> {
        self.heap.clone()
    }

    /// Build a native entry stub for `signature` that calls `closure` on
    /// every invocation (§4.F action factories all bottom out here).
    pub fn build_entry_stub(&self, signature: &FunctionSignature, closure: Substitute) -> Result<Stub> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (n_in, n_out) = signature.arity();

        let mut module = self.module.lock().expect("dispatcher module mutex poisoned");
        let name = format!("hijack_stub_{id}");
        let code_ptr = build_entry_stub_body(&mut module, &name, id, n_in, n_out)?;

        REGISTRY.insert(
            id,
            StubEntry {
                inputs: signature.inputs.clone(),
                outputs: signature.outputs.clone(),
                closure,
                heap: self.heap.clone(),
            },
        );

        Ok(Stub { id, code_ptr })
    }

    /// Release a previously-built stub's closure. Idempotent.
    pub fn release(&self, stub: &Stub) {
        self.release_id(stub.id);
    }

    /// Release a previously-built stub's closure by its registry id, for
    /// callers (such as `hijack-core`'s patch registry) that keep only the
    /// id rather than the whole [`Stub`]. Idempotent.
    pub fn release_id(&self, id: u64) {
        REGISTRY.remove(&id);
    }

    /// Build a call-through thunk that invokes the real function at
    /// `target_addr` with `arity` inputs/outputs, presented through the
    /// uniform `(args, n_in, outs, n_out)` calling convention (§4.G
    /// invoke-original's "call the original" building block).
    pub fn build_caller_thunk(&self, arity: (usize, usize), target_addr: u64) -> Result<CallerThunk> {
        let (n_in, n_out) = arity;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut module = self.module.lock().expect("dispatcher module mutex poisoned");
        let name = format!("hijack_caller_{id}");

        let code_ptr = build_caller_body(&mut module, &name, n_in, n_out, target_addr)?;
        Ok(unsafe { std::mem::transmute::<*const u8, CallerThunk>(code_ptr) })
    }
}

/// Shape of the `hijack_dispatch_entry` landing pad as cranelift sees it:
/// five `i64` params (`ctx`, `args_ptr`, `n_in`, `outs_ptr`, `n_out`), no
/// return.
fn entry_call_signature(module: &JITModule) -> cranelift_codegen::ir::Signature {
    let mut sig = module.make_signature();
    for _ in 0..5 {
        sig.params.push(AbiParam::new(types::I64));
    }
    sig
}

/// Build a stub of `n_in` `i64` params -> `n_out` `i64` returns whose body
/// stores its params into a stack array, calls the fixed `hijack_dispatch_entry`
/// landing pad with `(id, args_ptr, n_in, outs_ptr, n_out)`, then loads the
/// returns back out of a second stack array.
fn build_entry_stub_body(module: &mut JITModule, name: &str, id: u64, n_in: usize, n_out: usize) -> Result<*const u8> {
    let mut ctx = module.make_context();
    let mut sig = module.make_signature();
    for _ in 0..n_in {
        sig.params.push(AbiParam::new(types::I64));
    }
    for _ in 0..n_out {
        sig.returns.push(AbiParam::new(types::I64));
    }
    ctx.func.signature = sig;

    let dispatch_fn_id = module
        .declare_function("hijack_dispatch_entry", Linkage::Import, &entry_call_signature(module))
        .map_err(|e| DispatchError::Build(e.to_string()))?;

    let mut func_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let args_slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            (n_in.max(1) * 8) as u32,
        ));
        let outs_slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            (n_out.max(1) * 8) as u32,
        ));

        for i in 0..n_in {
            let param = builder.block_params(entry_block)[i];
            builder.ins().stack_store(param, args_slot, (i * 8) as i32);
        }

        let args_ptr = builder.ins().stack_addr(types::I64, args_slot, 0);
        let outs_ptr = builder.ins().stack_addr(types::I64, outs_slot, 0);
        let ctx_val = builder.ins().iconst(types::I64, id as i64);
        let n_in_val = builder.ins().iconst(types::I64, n_in as i64);
        let n_out_val = builder.ins().iconst(types::I64, n_out as i64);

        let callee = module.declare_func_in_func(dispatch_fn_id, builder.func);
        builder
            .ins()
            .call(callee, &[ctx_val, args_ptr, n_in_val, outs_ptr, n_out_val]);

        let mut rets = Vec::with_capacity(n_out);
        for i in 0..n_out {
            rets.push(builder.ins().stack_load(types::I64, outs_slot, (i * 8) as i32));
        }
        builder.ins().return_(&rets);
        builder.finalize();
    }

    let func_id = module
        .declare_function(name, Linkage::Export, &ctx.func.signature.clone())
        .map_err(|e| DispatchError::Build(e.to_string()))?;
    module
        .define_function(func_id, &mut ctx)
        .map_err(|e| DispatchError::Build(e.to_string()))?;
    module.clear_context(&mut ctx);
    module
        .finalize_definitions()
        .map_err(|e| DispatchError::Build(e.to_string()))?;

    Ok(module.get_finalized_function(func_id))
}

/// Build a thunk with the uniform `(args_ptr, n_in, outs_ptr, n_out)` entry
/// convention whose body loads `n_in` words out of `args_ptr`, calls the
/// fixed address `target_addr` with them as native `i64` arguments, and
/// stores up to `n_out` native returns into `outs_ptr`.
fn build_caller_body(module: &mut JITModule, name: &str, n_in: usize, n_out: usize, target_addr: u64) -> Result<*const u8> {
    let mut ctx = module.make_context();
    let mut sig = module.make_signature();
    for _ in 0..4 {
        sig.params.push(AbiParam::new(types::I64));
    }
    ctx.func.signature = sig;

    let mut func_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let args_ptr = builder.block_params(entry_block)[0];
        let outs_ptr = builder.block_params(entry_block)[2];

        let mut target_sig = module.make_signature();
        for _ in 0..n_in {
            target_sig.params.push(AbiParam::new(types::I64));
        }
        for _ in 0..n_out {
            target_sig.returns.push(AbiParam::new(types::I64));
        }
        let sig_ref = builder.import_signature(target_sig);
        let target_val = builder.ins().iconst(types::I64, target_addr as i64);

        let mut call_args = Vec::with_capacity(n_in);
        for i in 0..n_in {
            call_args.push(builder.ins().load(
                types::I64,
                cranelift_codegen::ir::MemFlags::trusted(),
                args_ptr,
                (i * 8) as i32,
            ));
        }

        let call = builder.ins().call_indirect(sig_ref, target_val, &call_args);
        let results = builder.inst_results(call).to_vec();
        for (i, r) in results.into_iter().enumerate().take(n_out) {
            builder.ins().store(
                cranelift_codegen::ir::MemFlags::trusted(),
                r,
                outs_ptr,
                (i * 8) as i32,
            );
        }

        builder.ins().return_(&[]);
        builder.finalize();
    }

    let func_id = module
        .declare_function(name, Linkage::Export, &ctx.func.signature.clone())
        .map_err(|e| DispatchError::Build(e.to_string()))?;
    module
        .define_function(func_id, &mut ctx)
        .map_err(|e| DispatchError::Build(e.to_string()))?;
    module.clear_context(&mut ctx);
    module
        .finalize_definitions()
        .map_err(|e| DispatchError::Build(e.to_string()))?;

    Ok(module.get_finalized_function(func_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hijack_resolver::ScalarKind;
    use std::sync::atomic::AtomicBool;

    fn int_signature(name: &str, n_in: usize, n_out: usize) -> FunctionSignature {
        FunctionSignature {
            qualified_name: name.to_string(),
            inputs: vec![TypeDescriptor::Scalar(ScalarKind::Int); n_in],
            outputs: vec![TypeDescriptor::Scalar(ScalarKind::Int); n_out],
        }
    }

    #[test]
    fn entry_stub_calls_the_installed_closure() {
        let dispatcher = Dispatcher::new().expect("dispatcher builds on the host ISA");
        let called = Arc::new(AtomicBool::new(false));
        let called_inner = called.clone();

        let closure: Substitute = Arc::new(move |inputs: &[DynValue]| {
            called_inner.store(true, Ordering::SeqCst);
            vec![DynValue::Int(inputs[0].as_int() + 1)]
        });

        let sig = int_signature("probe", 1, 1);
        let stub = dispatcher
            .build_entry_stub(&sig, closure)
            .expect("stub builds for a one-in one-out int signature");

        let entry: unsafe extern "C" fn(i64) -> i64 =
            unsafe { std::mem::transmute(stub.code_ptr) };
        let result = unsafe { entry(41) };

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(result, 42);

        dispatcher.release(&stub);
        assert!(!REGISTRY.contains_key(&stub.id));
    }

    #[test]
    fn release_is_idempotent() {
        let dispatcher = Dispatcher::new().expect("dispatcher builds on the host ISA");
        let sig = int_signature("noop", 0, 0);
        let stub = dispatcher
            .build_entry_stub(&sig, Arc::new(|_| Vec::new()))
            .expect("zero-arity stub builds");
        dispatcher.release(&stub);
        dispatcher.release(&stub);
    }
}
