//! Cell mesh controller library.
//!
//! This crate primarily ships the `mesh-controller` binary, but we expose the
//! library surface so the orchestrators can be driven against an in-memory
//! store in integration tests.

pub mod config;
pub mod controller;
pub mod kube;
pub mod model;
pub mod naming;
pub mod resources;
pub mod routing;
pub mod runtime;
pub mod state;
