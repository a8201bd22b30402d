//! The clock and sink behind the synthesis layer.
//!
//! A [`Context`] owns a small audio graph (sources, gains, filters, one
//! destination) and a suspendable clock. Every automatable value on a node
//! is an [`AutomationParam`] supporting "set immediately", "cancel future
//! changes", and "exponential approach" scheduling. The synth layer never
//! touches samples directly; it schedules parameter changes against the
//! clock and the graph renders them.

use std::cell::RefCell;
use std::rc::Rc;

/// Graph management, clock lifecycle, and block rendering.
pub mod context;
/// Node kinds and their sample generation.
pub mod node;
/// Scheduled parameter automation.
pub mod param;

pub use context::{Context, ContextState};
pub use node::{ConnectTarget, FilterKind, NodeId, ParamKind, Waveform};
pub use param::{AutomationEvent, AutomationParam};

/// Single-threaded shared handle to a context. One logical thread of
/// control; exclusion is structural, not locked.
pub type SharedContext = Rc<RefCell<Context>>;

/// Convenience constructor for a shared context.
pub fn shared_context(sample_rate: f32) -> SharedContext {
    Rc::new(RefCell::new(Context::new(sample_rate)))
}
