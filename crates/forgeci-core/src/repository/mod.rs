//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (forgeci-infra) implements. The core crate never depends on any specific
//! storage technology. `memory` provides in-process implementations used by
//! the engine's own tests.

pub mod artifact;
pub mod memory;
pub mod project;
pub mod secret;
pub mod workflow;
