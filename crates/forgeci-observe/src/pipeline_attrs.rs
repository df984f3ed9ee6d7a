//! OpenTelemetry CI/CD Semantic Convention attribute constants.
//!
//! These follow the OTel CICD Semantic Conventions specification for
//! consistent pipeline instrumentation across the codebase. All constants are
//! string slices usable in `tracing::span!` and `tracing::info_span!` field
//! names.
//!
//! Span naming convention: `"{pipeline} run #{number}"` (e.g., `"ci run #42"`)

// --- Pipeline attributes ---

/// The human readable name of the pipeline within a CI/CD system.
pub const CICD_PIPELINE_NAME: &str = "cicd.pipeline.name";

/// The unique identifier of a pipeline run within a CI/CD system.
pub const CICD_PIPELINE_RUN_ID: &str = "cicd.pipeline.run.id";

/// The pipeline run goes through these states during its lifecycle
/// (e.g., "pending", "executing", "finalizing").
pub const CICD_PIPELINE_RUN_STATE: &str = "cicd.pipeline.run.state";

/// The result of a pipeline run (e.g., "success", "failure", "cancellation",
/// "timeout", "skip").
pub const CICD_PIPELINE_RESULT: &str = "cicd.pipeline.result";

// --- Task attributes ---

/// The human readable name of a task within a pipeline.
pub const CICD_PIPELINE_TASK_NAME: &str = "cicd.pipeline.task.name";

/// The unique identifier of a task run within a pipeline.
pub const CICD_PIPELINE_TASK_RUN_ID: &str = "cicd.pipeline.task.run.id";

/// The result of a task run (e.g., "success", "failure", "skip").
pub const CICD_PIPELINE_TASK_RUN_RESULT: &str = "cicd.pipeline.task.run.result";

// --- Worker attributes ---

/// The unique identifier of a worker within a CICD system.
pub const CICD_WORKER_ID: &str = "cicd.worker.id";

/// The name of a component of the CICD system (e.g., "scheduler", "ticker").
pub const CICD_SYSTEM_COMPONENT: &str = "cicd.system.component";
