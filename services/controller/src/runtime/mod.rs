//! Queue and worker runtime.

mod queue;
mod worker;

pub use queue::WorkQueue;
pub use worker::KindWorker;
