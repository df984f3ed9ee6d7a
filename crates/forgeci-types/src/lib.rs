//! Shared domain types for the Forge CI orchestration engine.
//!
//! This crate contains the core domain types used across the engine:
//! workflow/run/job/step entities, the parsed workflow specification,
//! trigger events, secrets, artifacts, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod event;
pub mod ids;
pub mod run;
pub mod secret;
pub mod spec;
pub mod workflow;
