//! Business logic services (use cases).
//!
//! Services orchestrate the engine pieces behind trait seams -- repository,
//! permission, and executor implementations are supplied by the caller, so
//! this crate never depends on concrete infrastructure.

pub mod dispatch;
