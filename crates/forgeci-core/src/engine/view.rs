//! Read-only aggregate view of a run and its job/step tree.

use chrono::{DateTime, Utc};
use forgeci_types::error::RepositoryError;
use forgeci_types::ids::RunId;
use forgeci_types::run::{RunConclusion, RunStatus, WorkflowJob, WorkflowStep};
use forgeci_types::workflow::TriggerKind;
use serde::Serialize;

use crate::repository::workflow::WorkflowRepository;

/// Snapshot of a run for status queries. Jobs are ordered ascending by
/// `job_id`, steps by `step_number`, matching scheduler dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusView {
    pub run_id: RunId,
    pub run_number: u64,
    pub trigger_event: TriggerKind,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub jobs: Vec<JobStatusView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub runs_on: String,
    pub matrix_values: Option<serde_json::Value>,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub duration_seconds: Option<f64>,
    pub steps: Vec<StepStatusView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepStatusView {
    pub step_number: u32,
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub exit_code: Option<i32>,
    pub duration_seconds: Option<f64>,
}

/// Assemble the view for one run. Returns `None` for an unknown run id.
pub async fn run_status_view<R: WorkflowRepository>(
    repo: &R,
    run_id: &RunId,
) -> Result<Option<RunStatusView>, RepositoryError> {
    let Some(run) = repo.get_run(run_id).await? else {
        return Ok(None);
    };

    let mut jobs = Vec::new();
    for job in repo.list_jobs(run_id).await? {
        let steps = repo
            .list_steps(&job.id)
            .await?
            .into_iter()
            .map(step_view)
            .collect();
        jobs.push(job_view(job, steps));
    }

    Ok(Some(RunStatusView {
        run_id: run.id,
        run_number: run.run_number,
        trigger_event: run.trigger_event,
        status: run.status,
        conclusion: run.conclusion,
        created_at: run.created_at,
        started_at: run.started_at,
        completed_at: run.completed_at,
        duration_seconds: run.duration_seconds,
        jobs,
    }))
}

fn job_view(job: WorkflowJob, steps: Vec<StepStatusView>) -> JobStatusView {
    JobStatusView {
        job_id: job.job_id,
        runs_on: job.runs_on,
        matrix_values: job.matrix_values,
        status: job.status,
        conclusion: job.conclusion,
        duration_seconds: job.duration_seconds,
        steps,
    }
}

fn step_view(step: WorkflowStep) -> StepStatusView {
    StepStatusView {
        step_number: step.step_number,
        name: step.name,
        status: step.status,
        conclusion: step.conclusion,
        exit_code: step.exit_code,
        duration_seconds: step.duration_seconds,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::materializer::RunMaterializer;
    use crate::engine::parser;
    use crate::repository::memory::MemoryWorkflowRepository;
    use forgeci_types::ids::ProjectId;
    use forgeci_types::workflow::Workflow;
    use serde_json::Value;

    #[tokio::test]
    async fn test_view_orders_jobs_and_steps() {
        let yaml = r#"
on: [push]
jobs:
  b:
    steps:
      - name: first
        run: "true"
      - name: second
        run: "true"
  a:
    steps:
      - run: "true"
"#;
        let repo = MemoryWorkflowRepository::new();
        let spec = parser::parse(yaml).unwrap();
        let wf = Workflow::new(ProjectId::new(), "ci", yaml, spec.trigger_kinds(), None);
        repo.save_workflow(&wf).await.unwrap();
        let run = RunMaterializer::materialize(
            &repo,
            &wf,
            &spec,
            TriggerKind::Push,
            None,
            Value::Null,
        )
        .await
        .unwrap();

        let view = run_status_view(&repo, &run.id).await.unwrap().unwrap();
        assert_eq!(view.run_number, 1);
        assert_eq!(view.status, RunStatus::Queued);
        assert_eq!(view.jobs.len(), 2);
        assert_eq!(view.jobs[0].job_id, "a");
        assert_eq!(view.jobs[1].job_id, "b");
        assert_eq!(view.jobs[1].steps.len(), 2);
        assert_eq!(view.jobs[1].steps[0].name, "first");
        assert_eq!(view.jobs[1].steps[1].step_number, 2);
    }

    #[tokio::test]
    async fn test_unknown_run_is_none() {
        let repo = MemoryWorkflowRepository::new();
        assert!(run_status_view(&repo, &RunId::new()).await.unwrap().is_none());
    }
}
