//! Workflow engine core: spec parsing, trigger evaluation, run materialization,
//! dependency scheduling, and job execution.
//!
//! This module contains the "brain" of the orchestrator:
//! - `parser` -- YAML parsing and structural validation of workflow specs
//! - `dag` -- job graph validation (cycle and reference checking)
//! - `condition` -- step condition evaluation (`always()`, `success()`, `failure()`, expressions)
//! - `trigger` -- matches inbound events against enabled workflows
//! - `schedule` -- cron ticker with missed-run detection for schedule triggers
//! - `materializer` -- expands a spec into a persisted Run/Job/Step graph
//! - `scheduler` -- Kahn-style asynchronous dependency scheduler
//! - `executor` -- runs one job's steps sequentially in a shell runner
//! - `command` -- shell command runner with timeout and cancellation
//! - `secrets` -- scoped secret resolution for step environments
//! - `reporter` -- the sole writer of status/conclusion/timing fields
//! - `view` -- read-side run status assembly for UI polling

pub mod command;
pub mod condition;
pub mod dag;
pub mod executor;
pub mod materializer;
pub mod parser;
pub mod reporter;
pub mod schedule;
pub mod scheduler;
pub mod secrets;
pub mod trigger;
pub mod view;
