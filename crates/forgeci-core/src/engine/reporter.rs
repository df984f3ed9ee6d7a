//! State reporter: the sole writer of status/conclusion/timing fields.
//!
//! Every run, job, and step transition funnels through here. The reporter
//! validates the move against the shared state machine (`queued ->
//! in_progress -> terminal`; terminal states admit nothing further), stamps
//! timing, computes durations on termination, and folds terminal run
//! conclusions into the owning workflow's lifetime counters.
//!
//! Per-run transitions are serialized behind one async mutex, which is the
//! single-writer-per-run invariant the scheduler relies on: concurrent job
//! executors for the same run never interleave their bookkeeping, while
//! distinct runs proceed fully in parallel.
//!
//! An illegal transition is a programming or integrity bug, never a
//! recoverable condition; callers must surface [`TransitionError::Illegal`]
//! and halt processing of the affected run rather than swallow it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use forgeci_types::error::RepositoryError;
use forgeci_types::ids::{JobRowId, RunId, StepRowId};
use forgeci_types::run::{RunConclusion, RunStatus, WorkflowJob, WorkflowRun, WorkflowStep};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from state transitions.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The requested move violates the entity state machine. Fatal for the
    /// affected run.
    #[error("illegal transition for {entity}: {from} -> {to}")]
    Illegal {
        entity: String,
        from: String,
        to: String,
    },

    /// A terminal status was requested without a conclusion, or a conclusion
    /// with a non-terminal status.
    #[error("conclusion mismatch for {entity}: status {status} with conclusion {conclusion:?}")]
    ConclusionMismatch {
        entity: String,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// StateReporter
// ---------------------------------------------------------------------------

/// Validates and persists all status/conclusion/timing mutations.
pub struct StateReporter<R: WorkflowRepository> {
    repo: Arc<R>,
    /// Per-run writer locks. Entries are created on first touch and removed
    /// when the run terminates.
    run_locks: DashMap<RunId, Arc<Mutex<()>>>,
}

impl<R: WorkflowRepository> StateReporter<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            run_locks: DashMap::new(),
        }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    /// Acquire the run's writer lock, serializing all bookkeeping for it.
    pub async fn lock_run(&self, run_id: RunId) -> OwnedMutexGuard<()> {
        let lock = self
            .run_locks
            .entry(run_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Run transitions
    // -----------------------------------------------------------------------

    /// Transition a run. On termination, updates the workflow's lifetime
    /// counters and drops the run's writer lock entry.
    pub async fn transition_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
    ) -> Result<WorkflowRun, TransitionError> {
        let _guard = self.lock_run(*run_id).await;

        let mut run = self
            .repo
            .get_run(run_id)
            .await?
            .ok_or_else(|| TransitionError::NotFound(format!("run {run_id}")))?;

        let entity = format!("run {run_id}");
        validate_move(&entity, run.status, status, conclusion)?;

        let now = Utc::now();
        let started_at = stamp_started(run.started_at, status, now);
        let (completed_at, duration) = stamp_completed(started_at, status, now);

        self.repo
            .update_run_state(run_id, status, conclusion, started_at, completed_at, duration)
            .await?;

        run.status = status;
        run.conclusion = conclusion.or(run.conclusion);
        run.started_at = started_at.or(run.started_at);
        run.completed_at = completed_at;
        run.duration_seconds = duration;

        if status.is_terminal() {
            let conclusion = conclusion.ok_or(TransitionError::ConclusionMismatch {
                entity: entity.clone(),
                status,
                conclusion,
            })?;
            self.repo
                .record_run_outcome(&run.workflow_id, conclusion, now)
                .await?;
            self.run_locks.remove(run_id);
            tracing::info!(
                run_id = %run_id,
                run_number = run.run_number,
                %status,
                %conclusion,
                "run terminated"
            );
        } else {
            tracing::debug!(run_id = %run_id, %status, "run transition");
        }

        Ok(run)
    }

    // -----------------------------------------------------------------------
    // Job transitions
    // -----------------------------------------------------------------------

    pub async fn transition_job(
        &self,
        run_id: &RunId,
        job_row_id: &JobRowId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
    ) -> Result<WorkflowJob, TransitionError> {
        let _guard = self.lock_run(*run_id).await;

        let mut job = self
            .repo
            .get_job(job_row_id)
            .await?
            .ok_or_else(|| TransitionError::NotFound(format!("job {job_row_id}")))?;

        let entity = format!("job '{}'", job.job_id);
        validate_move(&entity, job.status, status, conclusion)?;

        let now = Utc::now();
        let started_at = stamp_started(job.started_at, status, now);
        let (completed_at, duration) = stamp_completed(started_at, status, now);

        self.repo
            .update_job_state(job_row_id, status, conclusion, started_at, completed_at, duration)
            .await?;

        job.status = status;
        job.conclusion = conclusion.or(job.conclusion);
        job.started_at = started_at.or(job.started_at);
        job.completed_at = completed_at;
        job.duration_seconds = duration;

        tracing::debug!(
            run_id = %run_id,
            job_id = job.job_id.as_str(),
            %status,
            conclusion = conclusion.map(|c| c.to_string()).unwrap_or_default(),
            "job transition"
        );

        Ok(job)
    }

    // -----------------------------------------------------------------------
    // Step transitions
    // -----------------------------------------------------------------------

    pub async fn transition_step(
        &self,
        run_id: &RunId,
        step_row_id: &StepRowId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
    ) -> Result<WorkflowStep, TransitionError> {
        let _guard = self.lock_run(*run_id).await;

        let mut step = self
            .repo
            .get_step(step_row_id)
            .await?
            .ok_or_else(|| TransitionError::NotFound(format!("step {step_row_id}")))?;

        let entity = format!("step {} '{}'", step.step_number, step.name);
        validate_move(&entity, step.status, status, conclusion)?;

        let now = Utc::now();
        let started_at = stamp_started(step.started_at, status, now);
        let (completed_at, duration) = stamp_completed(started_at, status, now);

        self.repo
            .update_step_state(step_row_id, status, conclusion, started_at, completed_at, duration)
            .await?;

        step.status = status;
        step.conclusion = conclusion.or(step.conclusion);
        step.started_at = started_at.or(step.started_at);
        step.completed_at = completed_at;
        step.duration_seconds = duration;

        Ok(step)
    }

    /// Record a step's captured output after redaction. Output fields are
    /// written once, alongside the step's terminal transition.
    pub async fn record_step_result(
        &self,
        run_id: &RunId,
        step_row_id: &StepRowId,
        output: &str,
        error_output: &str,
        exit_code: Option<i32>,
    ) -> Result<(), TransitionError> {
        let _guard = self.lock_run(*run_id).await;
        self.repo
            .record_step_result(step_row_id, output, error_output, exit_code)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State machine rules
// ---------------------------------------------------------------------------

/// Shared transition rules for runs, jobs, and steps.
///
/// Allowed: `queued -> in_progress`, `queued -> terminal` (skip, cancel),
/// `in_progress -> terminal`. Terminal states admit nothing. A conclusion
/// accompanies exactly the terminal transitions.
fn validate_move(
    entity: &str,
    from: RunStatus,
    to: RunStatus,
    conclusion: Option<RunConclusion>,
) -> Result<(), TransitionError> {
    let legal = match (from, to) {
        (RunStatus::Queued, RunStatus::InProgress) => true,
        (RunStatus::Queued | RunStatus::InProgress, to) if to.is_terminal() => true,
        _ => false,
    };
    if !legal {
        return Err(TransitionError::Illegal {
            entity: entity.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    if to.is_terminal() != conclusion.is_some() {
        return Err(TransitionError::ConclusionMismatch {
            entity: entity.to_string(),
            status: to,
            conclusion,
        });
    }
    Ok(())
}

fn stamp_started(
    existing: Option<DateTime<Utc>>,
    to: RunStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (existing, to) {
        (Some(t), _) => Some(t),
        (None, RunStatus::InProgress) => Some(now),
        // Queued -> terminal (skipped/cancelled) never started.
        (None, _) => None,
    }
}

fn stamp_completed(
    started_at: Option<DateTime<Utc>>,
    to: RunStatus,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<f64>) {
    if !to.is_terminal() {
        return (None, None);
    }
    let duration =
        started_at.map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0);
    (Some(now), duration)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryWorkflowRepository;
    use forgeci_types::ids::ProjectId;
    use forgeci_types::workflow::{TriggerKind, Workflow};
    use serde_json::Value;

    async fn seed_run(repo: &Arc<MemoryWorkflowRepository>) -> (Workflow, WorkflowRun) {
        let wf = Workflow::new(
            ProjectId::new(),
            "ci",
            "on: [push]\njobs: {}",
            vec![TriggerKind::Push],
            None,
        );
        repo.save_workflow(&wf).await.unwrap();
        let run = WorkflowRun {
            id: RunId::new(),
            workflow_id: wf.id,
            run_number: 0,
            trigger_event: TriggerKind::Push,
            trigger_user: None,
            trigger_data: Value::Null,
            status: RunStatus::Queued,
            conclusion: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        };
        repo.create_run_graph(&run, &[], &[]).await.unwrap();
        (wf, run)
    }

    // -----------------------------------------------------------------------
    // Legal transitions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_run_lifecycle_stamps_timing() {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let reporter = StateReporter::new(Arc::clone(&repo));
        let (_, run) = seed_run(&repo).await;

        let run = reporter
            .transition_run(&run.id, RunStatus::InProgress, None)
            .await
            .unwrap();
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_none());

        let run = reporter
            .transition_run(&run.id, RunStatus::Completed, Some(RunConclusion::Success))
            .await
            .unwrap();
        assert!(run.completed_at.is_some());
        assert!(run.duration_seconds.is_some());
        assert_eq!(run.conclusion, Some(RunConclusion::Success));
    }

    #[tokio::test]
    async fn test_terminal_run_updates_workflow_counters() {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let reporter = StateReporter::new(Arc::clone(&repo));
        let (wf, run) = seed_run(&repo).await;

        reporter
            .transition_run(&run.id, RunStatus::InProgress, None)
            .await
            .unwrap();
        reporter
            .transition_run(&run.id, RunStatus::Failed, Some(RunConclusion::Failure))
            .await
            .unwrap();

        let wf = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(wf.total_runs, 1);
        assert_eq!(wf.failed_runs, 1);
        assert_eq!(wf.last_run_status, Some(RunConclusion::Failure));
    }

    #[tokio::test]
    async fn test_queued_run_may_cancel_without_start() {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let reporter = StateReporter::new(Arc::clone(&repo));
        let (_, run) = seed_run(&repo).await;

        let run = reporter
            .transition_run(&run.id, RunStatus::Cancelled, Some(RunConclusion::Cancelled))
            .await
            .unwrap();
        assert!(run.started_at.is_none());
        assert!(run.duration_seconds.is_none());
        assert!(run.completed_at.is_some());
    }

    // -----------------------------------------------------------------------
    // Illegal transitions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_terminal_run_admits_nothing() {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let reporter = StateReporter::new(Arc::clone(&repo));
        let (_, run) = seed_run(&repo).await;

        reporter
            .transition_run(&run.id, RunStatus::InProgress, None)
            .await
            .unwrap();
        reporter
            .transition_run(&run.id, RunStatus::Completed, Some(RunConclusion::Success))
            .await
            .unwrap();

        let err = reporter
            .transition_run(&run.id, RunStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));

        let err = reporter
            .transition_run(&run.id, RunStatus::Queued, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
    }

    #[tokio::test]
    async fn test_terminal_requires_conclusion() {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let reporter = StateReporter::new(Arc::clone(&repo));
        let (_, run) = seed_run(&repo).await;

        let err = reporter
            .transition_run(&run.id, RunStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::ConclusionMismatch { .. }));

        let err = reporter
            .transition_run(
                &run.id,
                RunStatus::InProgress,
                Some(RunConclusion::Success),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::ConclusionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let reporter = StateReporter::new(repo);
        let err = reporter
            .transition_run(&RunId::new(), RunStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotFound(_)));
    }
}
