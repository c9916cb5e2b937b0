//! Hijack Orchestrator (§4.F, §4.G of the hijack engine spec).
//!
//! Ties the resolver (`hijack-resolver`), the JIT dispatch layer
//! (`hijack-dispatch`), and the code patcher (`hijack-patch`) together into
//! the serialized applier + patch registry + action library that a control
//! surface drives. [`start`] is the whole of this crate's bootstrap; the
//! returned [`Hijacker`] is the facade every external caller uses.

mod actions;
mod error;
mod hijacker;
mod orchestrator;
mod point;
mod registry;

pub use error::{HijackError, Result};
pub use hijacker::{start, Hijacker};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorHandle};
pub use point::{ActionKind, HijackPoint, HijackValue};
pub use registry::{InstalledPatch, Registry};
