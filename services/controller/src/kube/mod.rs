//! Cluster adapters: the store, the event recorder and the watches.

mod recorder;
mod store;
mod watch;

pub use recorder::{KubeRecorder, REPORTING_COMPONENT};
pub use store::{api_resource, from_dynamic, to_dynamic, KubeStore};
pub use watch::{resync, watch_kind, watch_mesh, Queues};
