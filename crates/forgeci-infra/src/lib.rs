//! Infrastructure implementations for the ForgeCI engine.
//!
//! Concrete backends for the trait seams `forgeci-core` defines: SQLite
//! persistence for workflows, runs, and secrets, AES-256-GCM encryption for
//! secret values at rest, and filesystem-backed artifact storage.

pub mod artifact;
pub mod crypto;
pub mod sqlite;
