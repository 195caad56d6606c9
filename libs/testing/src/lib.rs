//! Test doubles for the cellmesh controller.
//!
//! - [`MemoryStore`]: an in-memory [`Store`](cellmesh_reconcile::Store) with
//!   server-like generation and resource-version bookkeeping, call recording
//!   and fault injection.
//! - [`RecordingRecorder`]: an event sink that keeps every event.

mod memory;
mod recorder;

pub use memory::{Call, MemoryStore, Op};
pub use recorder::RecordingRecorder;
