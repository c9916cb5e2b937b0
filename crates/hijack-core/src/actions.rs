//! Action Library (§4.F).
//!
//! Each factory here takes a resolved target and a [`HijackPoint`] and
//! produces an installed [`InstalledPatch`]: it synthesizes a substitute
//! closure of the target's reconstructed signature, builds a JIT entry stub
//! for it, and patches the target's entry to jump there. The "invoke
//! original" call-through shared by `delay`/`set`/`return` is the one piece
//! of real complexity (§4.G) — see [`call_through`].

use std::sync::Arc;

use once_cell::sync::OnceCell;

use hijack_dispatch::{value_to_word, word_to_value, CallerThunk, Dispatcher, DynValue, Substitute, ValueHeap};
use hijack_patch::{patch_direct, Guard};
use hijack_resolver::{FunctionSignature, ScalarKind, Symbol, TypeDescriptor};

use crate::error::{HijackError, Result};
use crate::orchestrator::OrchestratorHandle;
use crate::point::{ActionKind, HijackPoint, HijackValue};
use crate::registry::InstalledPatch;

/// Build and install the substitute for `point` against `symbol`/`signature`.
///
/// Runs entirely on whatever thread calls it (the applier, via
/// `Hijacker::apply`'s enqueued job) — `patch_direct` itself is the only
/// code mutation, matching §4.G's "installs ... via E" for every action.
pub fn install(
    dispatcher: &Dispatcher,
    orchestrator: OrchestratorHandle,
    symbol: &Symbol,
    signature: &FunctionSignature,
    point: &HijackPoint,
) -> Result<InstalledPatch> {
    match point.action {
        ActionKind::Delay => install_delay(dispatcher, orchestrator, symbol, signature, point),
        ActionKind::Panic => install_panic(dispatcher, symbol, signature, point),
        ActionKind::Set => install_set(dispatcher, orchestrator, symbol, signature, point),
        ActionKind::Return => install_return(dispatcher, orchestrator, symbol, signature, point),
    }
}

/// Validate and install `delay` (§4.F: sleep, then call through).
fn install_delay(
    dispatcher: &Dispatcher,
    orchestrator: OrchestratorHandle,
    symbol: &Symbol,
    signature: &FunctionSignature,
    point: &HijackPoint,
) -> Result<InstalledPatch> {
    let millis = point
        .val
        .as_int()
        .filter(|v| *v > 0)
        .ok_or_else(|| HijackError::UnsupportedAction(format!("delay.val must be a positive integer, got {:?}", point.val)))?;

    let caller = CallThrough::new(dispatcher, orchestrator, symbol, signature)?;
    let caller_for_closure = caller.clone();
    let substitute: Substitute = Arc::new(move |inputs: &[DynValue]| {
        std::thread::sleep(std::time::Duration::from_millis(millis as u64));
        caller_for_closure.call(inputs)
    });

    let patch = finish_install(dispatcher, symbol, signature, substitute)?;
    caller.bind(patch.guard.clone());
    Ok(patch)
}

/// Validate and install `panic` (§4.F: unconditional abort, never returns).
fn install_panic(
    dispatcher: &Dispatcher,
    symbol: &Symbol,
    signature: &FunctionSignature,
    point: &HijackPoint,
) -> Result<InstalledPatch> {
    let HijackValue::Str(message) = &point.val else {
        return Err(HijackError::UnsupportedAction(format!(
            "panic.val must be a string, got {:?}",
            point.val
        )));
    };
    let message = message.clone();

    let substitute: Substitute = Arc::new(move |_inputs: &[DynValue]| -> Vec<DynValue> {
        panic!("hijack:{message}");
    });

    finish_install(dispatcher, symbol, signature, substitute)
}

/// Validate and install `set` (§4.F: overwrite `args[index]`, call through).
fn install_set(
    dispatcher: &Dispatcher,
    orchestrator: OrchestratorHandle,
    symbol: &Symbol,
    signature: &FunctionSignature,
    point: &HijackPoint,
) -> Result<InstalledPatch> {
    let index = validate_index(point.index, signature.inputs.len(), "set")?;
    validate_assignable(&point.val, &signature.inputs[index], "set")?;

    let caller = CallThrough::new(dispatcher, orchestrator, symbol, signature)?;
    let caller_for_closure = caller.clone();
    let value = point.val.clone();
    let substitute: Substitute = Arc::new(move |inputs: &[DynValue]| {
        let mut patched = inputs.to_vec();
        patched[index] = dyn_value_of(&value);
        caller_for_closure.call(&patched)
    });

    let patch = finish_install(dispatcher, symbol, signature, substitute)?;
    caller.bind(patch.guard.clone());
    Ok(patch)
}

/// Validate and install `return` (§4.F: call through, overwrite `results[index]`).
fn install_return(
    dispatcher: &Dispatcher,
    orchestrator: OrchestratorHandle,
    symbol: &Symbol,
    signature: &FunctionSignature,
    point: &HijackPoint,
) -> Result<InstalledPatch> {
    let index = validate_index(point.index, signature.outputs.len(), "return")?;
    validate_assignable(&point.val, &signature.outputs[index], "return")?;

    let caller = CallThrough::new(dispatcher, orchestrator, symbol, signature)?;
    let caller_for_closure = caller.clone();
    let value = point.val.clone();
    let substitute: Substitute = Arc::new(move |inputs: &[DynValue]| {
        let mut results = caller_for_closure.call(inputs);
        if let Some(slot) = results.get_mut(index) {
            *slot = dyn_value_of(&value);
        }
        results
    });

    let patch = finish_install(dispatcher, symbol, signature, substitute)?;
    caller.bind(patch.guard.clone());
    Ok(patch)
}

/// Build the JIT entry stub for `substitute` and patch it over the target's
/// entry (§4.E `patch_direct` applied to every action's substitute, per
/// SPEC_FULL's "Direct patching is likewise used to install every action's
/// substitute").
fn finish_install(
    dispatcher: &Dispatcher,
    symbol: &Symbol,
    signature: &FunctionSignature,
    substitute: Substitute,
) -> Result<InstalledPatch> {
    let stub = dispatcher.build_entry_stub(signature, substitute)?;
    let guard = patch_direct(symbol.entry_address, stub.code_ptr as u64);
    Ok(InstalledPatch {
        guard,
        stub_id: stub.id,
    })
}

fn validate_index(index: Option<usize>, arity: usize, action: &str) -> Result<usize> {
    let index = index.ok_or_else(|| HijackError::UnsupportedAction(format!("{action} requires an index")))?;
    if index >= arity {
        return Err(HijackError::UnsupportedAction(format!(
            "{action} index {index} out of range (arity {arity})"
        )));
    }
    Ok(index)
}

/// Loose assignability check (§3: "whose runtime type must be assignable to
/// the input/output slot"). Composite descriptors (struct/slice/map/chan/
/// interface/opaque) accept any value, since the control surface has no way
/// to express a literal of those shapes; only scalar slots are checked.
fn validate_assignable(val: &HijackValue, desc: &TypeDescriptor, action: &str) -> Result<()> {
    let ok = match desc {
        TypeDescriptor::Scalar(ScalarKind::Int) => matches!(val, HijackValue::Int(_) | HijackValue::Uint(_)),
        TypeDescriptor::Scalar(ScalarKind::Uint) => matches!(val, HijackValue::Int(_) | HijackValue::Uint(_)),
        TypeDescriptor::Scalar(ScalarKind::Bool) => matches!(val, HijackValue::Bool(_)),
        TypeDescriptor::Scalar(ScalarKind::String) => matches!(val, HijackValue::Str(_)),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(HijackError::UnsupportedAction(format!(
            "{action}.val {val:?} is not assignable to slot of type {desc:?}"
        )))
    }
}

fn dyn_value_of(val: &HijackValue) -> DynValue {
    match val {
        HijackValue::Int(v) => DynValue::Int(*v),
        HijackValue::Uint(v) => DynValue::Uint(*v),
        HijackValue::Bool(v) => DynValue::Bool(*v),
        HijackValue::Str(v) => DynValue::Str(v.clone()),
    }
}

/// The invoke-original call-through building block shared by `delay`, `set`,
/// and `return` (§4.G "Invoke-original pattern").
///
/// The sequence — revert our patch, call the restored original, re-patch —
/// must run on the applier thread, because it briefly leaves the target
/// unpatched and a second installer racing that window would corrupt the
/// trampoline (§5). `CallThrough` enqueues exactly that sequence as one job
/// and blocks the calling thread (the hijacked function's actual caller,
/// not the applier) for the result.
///
/// The guard it reverts/restores is the *same* patch this call-through's own
/// substitute will be installed under; it isn't known until after the
/// substitute's entry stub is built and patched in, so it is threaded back
/// in through a [`OnceCell`] that `finish_install`'s caller fills in — see
/// [`CallThrough::bind`].
struct CallThrough {
    orchestrator: OrchestratorHandle,
    caller: CallerThunk,
    signature: FunctionSignature,
    heap: Arc<ValueHeap>,
    guard: OnceCell<Guard>,
}

impl CallThrough {
    fn new(
        dispatcher: &Dispatcher,
        orchestrator: OrchestratorHandle,
        symbol: &Symbol,
        signature: &FunctionSignature,
    ) -> Result<Arc<Self>> {
        let caller = dispatcher.build_caller_thunk(signature.arity(), symbol.entry_address)?;
        Ok(Arc::new(Self {
            orchestrator,
            caller,
            signature: signature.clone(),
            heap: dispatcher.heap(),
            guard: OnceCell::new(),
        }))
    }

    /// Invoke the real function with `inputs`, returning its results.
    fn call(&self, inputs: &[DynValue]) -> Vec<DynValue> {
        let guard = self
            .guard
            .get()
            .expect("CallThrough::bind runs before any substitute call can occur")
            .clone();
        let in_words: Vec<i64> = self
            .signature
            .inputs
            .iter()
            .zip(inputs)
            .map(|(desc, value)| value_to_word(value, desc, &self.heap))
            .collect();
        let n_out = self.signature.outputs.len();
        let caller = self.caller;

        let out_words = self
            .orchestrator
            .enqueue_blocking(move || {
                guard.unpatch();
                let mut outs = vec![0i64; n_out.max(1)];
                unsafe {
                    caller(in_words.as_ptr(), in_words.len(), outs.as_mut_ptr(), n_out);
                }
                guard.restore();
                outs
            })
            .expect("applier alive for the duration of any installed hijack's call-through");

        self.signature
            .outputs
            .iter()
            .zip(out_words)
            .map(|(desc, word)| word_to_value(word, desc, &self.heap))
            .collect()
    }
}

impl CallThrough {
    /// Bind the patch guard this call-through reverts/restores, once it
    /// exists. Called by the installer right after `patch_direct` produces
    /// the guard for the very substitute `self` was captured into.
    fn bind(self: &Arc<Self>, guard: Guard) {
        let _ = self.guard.set(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Orchestrator;
    use hijack_resolver::ScalarKind;

    fn int_signature(n_in: usize, n_out: usize) -> FunctionSignature {
        FunctionSignature {
            qualified_name: "probe".to_string(),
            inputs: vec![TypeDescriptor::Scalar(ScalarKind::Int); n_in],
            outputs: vec![TypeDescriptor::Scalar(ScalarKind::Int); n_out],
        }
    }

    #[test]
    fn validate_index_rejects_missing_index() {
        let err = validate_index(None, 2, "set").unwrap_err();
        assert!(matches!(err, HijackError::UnsupportedAction(_)));
    }

    #[test]
    fn validate_index_rejects_out_of_range() {
        let err = validate_index(Some(5), 2, "set").unwrap_err();
        assert!(matches!(err, HijackError::UnsupportedAction(_)));
    }

    #[test]
    fn validate_assignable_checks_scalar_kind() {
        let desc = TypeDescriptor::Scalar(ScalarKind::String);
        assert!(validate_assignable(&HijackValue::Str("ok".into()), &desc, "set").is_ok());
        assert!(validate_assignable(&HijackValue::Int(1), &desc, "set").is_err());
    }

    #[test]
    fn delay_rejects_non_positive_val() {
        let point = HijackPoint {
            func: "probe".into(),
            action: ActionKind::Delay,
            val: HijackValue::Int(0),
            index: None,
        };
        let dispatcher = Dispatcher::new().expect("dispatcher builds on the host ISA");
        let orch = Orchestrator::spawn();
        let symbol = Symbol {
            name: "probe".into(),
            entry_address: 0,
        };
        let sig = int_signature(1, 1);
        let err = install_delay(&dispatcher, orch.handle(), &symbol, &sig, &point).unwrap_err();
        assert!(matches!(err, HijackError::UnsupportedAction(_)));
    }

    #[test]
    fn panic_rejects_non_string_val() {
        let point = HijackPoint {
            func: "probe".into(),
            action: ActionKind::Panic,
            val: HijackValue::Int(1),
            index: None,
        };
        let dispatcher = Dispatcher::new().expect("dispatcher builds on the host ISA");
        let symbol = Symbol {
            name: "probe".into(),
            entry_address: 0,
        };
        let sig = int_signature(0, 0);
        let err = install_panic(&dispatcher, &symbol, &sig, &point).unwrap_err();
        assert!(matches!(err, HijackError::UnsupportedAction(_)));
    }
}
