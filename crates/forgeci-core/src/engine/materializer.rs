//! Run materialization: freezes a parsed workflow spec into a run graph.
//!
//! Expands matrix jobs into one concrete job per cell, rewires dependencies
//! on matrix jobs to cover every expanded cell, and persists the whole graph
//! in one repository transaction. The materialized rows are the scheduler's
//! source of truth; later edits to the workflow YAML never touch a run that
//! is already underway.

use std::collections::BTreeMap;

use chrono::Utc;
use forgeci_types::error::RepositoryError;
use forgeci_types::ids::{JobRowId, RunId, StepRowId, UserId};
use forgeci_types::run::{RunStatus, WorkflowJob, WorkflowRun, WorkflowStep};
use forgeci_types::spec::{JobSpec, WorkflowSpec};
use forgeci_types::workflow::{TriggerKind, Workflow};
use serde_json::Value;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

/// Builds and persists the run graph for a triggered workflow.
pub struct RunMaterializer;

impl RunMaterializer {
    /// Materialize one run: expand matrices, snapshot steps, persist the
    /// graph transactionally. Returns the run with its allocated number.
    pub async fn materialize<R: WorkflowRepository>(
        repo: &R,
        workflow: &Workflow,
        spec: &WorkflowSpec,
        trigger_event: TriggerKind,
        trigger_user: Option<UserId>,
        trigger_data: Value,
    ) -> Result<WorkflowRun, MaterializeError> {
        let mut run = WorkflowRun {
            id: RunId::new(),
            workflow_id: workflow.id,
            run_number: 0,
            trigger_event,
            trigger_user,
            trigger_data,
            status: RunStatus::Queued,
            conclusion: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        };

        let mut jobs = Vec::new();
        let mut steps = Vec::new();
        for (job_id, job_spec) in &spec.jobs {
            for cell in job_spec.matrix_cells() {
                let concrete_id = concrete_job_id(job_id, &cell);
                let depends_on = expand_dependencies(&job_spec.depends_on, &spec.jobs);
                let job = WorkflowJob {
                    id: JobRowId::new(),
                    run_id: run.id,
                    job_id: concrete_id,
                    depends_on,
                    tolerate_failed_dependencies: job_spec.tolerate_failed_dependencies,
                    runs_on: job_spec.runs_on.clone(),
                    matrix_values: if cell.is_empty() {
                        None
                    } else {
                        Some(serde_json::to_value(&cell).unwrap_or(Value::Null))
                    },
                    runner_id: None,
                    container_id: None,
                    status: RunStatus::Queued,
                    conclusion: None,
                    started_at: None,
                    completed_at: None,
                    duration_seconds: None,
                };
                for (number, step_spec) in job_spec.steps.iter().enumerate() {
                    steps.push(WorkflowStep {
                        id: StepRowId::new(),
                        job_row_id: job.id,
                        step_number: number as u32 + 1,
                        name: step_spec.display_name().to_string(),
                        command: step_spec.run.clone(),
                        condition: step_spec.condition.clone(),
                        continue_on_error: step_spec.continue_on_error,
                        timeout_secs: step_spec.timeout_secs,
                        output: None,
                        error_output: None,
                        exit_code: None,
                        status: RunStatus::Queued,
                        conclusion: None,
                        started_at: None,
                        completed_at: None,
                        duration_seconds: None,
                    });
                }
                jobs.push(job);
            }
        }

        let run_number = repo.create_run_graph(&run, &jobs, &steps).await?;
        run.run_number = run_number;

        tracing::info!(
            run_id = %run.id,
            workflow_id = %workflow.id,
            run_number,
            jobs = jobs.len(),
            trigger = %trigger_event,
            "run materialized"
        );
        Ok(run)
    }
}

/// Concrete job id for one matrix cell: `build[arch=arm64,os=linux]`.
/// Axes are already in key order from the `BTreeMap`, so the id is stable
/// across materializations.
pub fn concrete_job_id(base: &str, cell: &BTreeMap<String, Value>) -> String {
    if cell.is_empty() {
        return base.to_string();
    }
    let parts: Vec<String> = cell
        .iter()
        .map(|(axis, value)| format!("{axis}={}", value_label(value)))
        .collect();
    format!("{base}[{}]", parts.join(","))
}

/// The base job id a concrete id expands, with any matrix suffix stripped.
pub fn base_job_id(concrete: &str) -> &str {
    match concrete.find('[') {
        Some(idx) => &concrete[..idx],
        None => concrete,
    }
}

fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rewrite declared dependencies so a dependency on a matrix job waits on
/// every one of its cells.
fn expand_dependencies(
    declared: &[String],
    jobs: &BTreeMap<String, JobSpec>,
) -> Vec<String> {
    let mut expanded = Vec::new();
    for dep in declared {
        match jobs.get(dep) {
            Some(dep_spec) if dep_spec.matrix.is_some() => {
                for cell in dep_spec.matrix_cells() {
                    expanded.push(concrete_job_id(dep, &cell));
                }
            }
            _ => expanded.push(dep.clone()),
        }
    }
    expanded
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
