//! Workflow spec parsing and structural validation.
//!
//! Converts workflow YAML into the canonical `WorkflowSpec` and validates
//! structural constraints before any run is created: job graph acyclicity,
//! dependency references, non-empty step lists, matrix shape, secret name
//! grammar. Pure function over text -- re-parsing the same document yields a
//! structurally equal spec.

use forgeci_types::secret::SecretName;
use forgeci_types::spec::WorkflowSpec;
use forgeci_types::workflow::TriggerKind;
use thiserror::Error;

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced to the editing user; any of these blocks workflow save.
#[derive(Debug, Error)]
pub enum SpecError {
    /// YAML deserialization failure, with the source line when known.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The job graph contains a cycle.
    #[error("cycle detected in job graph involving job '{0}'")]
    CycleDetected(String),

    /// A `needs` entry references an undeclared job.
    #[error("job '{job_id}' needs unknown job '{dependency}'")]
    UnknownDependency { job_id: String, dependency: String },

    /// The spec declares no jobs.
    #[error("workflow must declare at least one job")]
    NoJobs,

    /// A job has an empty step list.
    #[error("job '{0}' has no steps")]
    EmptySteps(String),

    /// A matrix axis has no values, so the job expands to zero cells.
    #[error("job '{job_id}' matrix axis '{axis}' has no values")]
    EmptyMatrix { job_id: String, axis: String },

    /// A job references a secret whose name fails the grammar.
    #[error("job '{job_id}' references invalid secret name '{name}'")]
    InvalidSecretName { job_id: String, name: String },

    /// A step declares a zero timeout.
    #[error("job '{job_id}' step {step_number} has zero timeout")]
    ZeroTimeout { job_id: String, step_number: u32 },

    /// The `on` block names `schedule` but carries no cron expression.
    #[error("schedule trigger requires a cron expression")]
    MissingCron,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document into a validated `WorkflowSpec`.
///
/// Runs [`validate_spec`] after deserialization, so the returned value is
/// guaranteed structurally valid and safe to materialize.
pub fn parse(yaml: &str) -> Result<WorkflowSpec, SpecError> {
    let spec: WorkflowSpec = serde_yaml_ng::from_str(yaml).map_err(|e| {
        let line = e.location().map(|loc| loc.line()).unwrap_or(0);
        SpecError::Parse {
            line,
            message: e.to_string(),
        }
    })?;
    validate_spec(&spec)?;
    Ok(spec)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a parsed spec.
///
/// Checks:
/// - At least one job exists
/// - Every `needs` entry references a declared job id
/// - The job graph is acyclic
/// - Every job has at least one step
/// - Matrix axes (if present) each expand to at least one value
/// - Referenced secret names match `[A-Z][A-Z0-9_]*`
/// - Step timeouts, when set, are non-zero
/// - A `schedule` trigger carries a cron expression
pub fn validate_spec(spec: &WorkflowSpec) -> Result<(), SpecError> {
    if spec.jobs.is_empty() {
        return Err(SpecError::NoJobs);
    }

    // Reference and cycle checks over the needs graph.
    dag::validate_graph(&spec.jobs)?;

    for (job_id, job) in &spec.jobs {
        if job.steps.is_empty() {
            return Err(SpecError::EmptySteps(job_id.clone()));
        }

        if let Some(matrix) = &job.matrix {
            for (axis, values) in matrix {
                if values.is_empty() {
                    return Err(SpecError::EmptyMatrix {
                        job_id: job_id.clone(),
                        axis: axis.clone(),
                    });
                }
            }
        }

        for name in &job.secrets {
            if SecretName::new(name.clone()).is_err() {
                return Err(SpecError::InvalidSecretName {
                    job_id: job_id.clone(),
                    name: name.clone(),
                });
            }
        }

        for (idx, step) in job.steps.iter().enumerate() {
            if step.timeout_secs == Some(0) {
                return Err(SpecError::ZeroTimeout {
                    job_id: job_id.clone(),
                    step_number: idx as u32 + 1,
                });
            }
        }
    }

    if spec.trigger_kinds().contains(&TriggerKind::Schedule) && spec.schedule_cron().is_none() {
        return Err(SpecError::MissingCron);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
