//! # cellmesh-events
//!
//! Human-readable events emitted by the mesh controller.
//!
//! ## Design Principles
//!
//! - Every create, update and delete of a child resource produces an event,
//!   whether it succeeded or failed
//! - Events are independent of status fields, so the root cause of a
//!   `NotReady` parent stays visible
//! - Events never carry secret material, only names and messages
//!
//! ## Recording
//!
//! Reconcilers talk to an [`EventRecorder`]. Recording never blocks and never
//! fails from the caller's point of view; delivery is the recorder's concern.

mod envelope;
mod recorder;
mod types;

pub use envelope::*;
pub use recorder::*;
pub use types::*;
