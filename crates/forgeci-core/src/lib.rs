//! Orchestration engine and repository trait definitions for Forge CI.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements. It depends only on `forgeci-types` -- never on
//! `forgeci-infra` or any database/IO crate.

pub mod engine;
pub mod repository;
pub mod service;
