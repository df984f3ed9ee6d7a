//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflows, runs, jobs, and steps. The
//! infrastructure layer (forgeci-infra) implements this trait with SQLite
//! persistence.

use chrono::{DateTime, Utc};
use forgeci_types::error::RepositoryError;
use forgeci_types::ids::{JobRowId, ProjectId, RunId, StepRowId, WorkflowId};
use forgeci_types::run::{
    RunConclusion, RunStatus, WorkflowJob, WorkflowRun, WorkflowStep,
};
use forgeci_types::workflow::Workflow;

/// Repository trait for workflow persistence.
///
/// Covers four entity families:
/// - **Workflows:** CRUD plus lifetime counter updates.
/// - **Runs:** transactional graph creation, state updates, queries.
/// - **Jobs / Steps:** state updates driven by the state reporter, queries
///   driven by the scheduler and the run status view.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Upsert a workflow (insert or replace by ID).
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow by its UUID.
    fn get_workflow(
        &self,
        id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List the enabled workflows of a project.
    fn list_enabled_workflows(
        &self,
        project_id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// List all enabled workflows that carry a cron schedule (for the ticker).
    fn list_scheduled_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Delete a workflow and its run history. Returns `true` if it existed.
    fn delete_workflow(
        &self,
        id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Fold a terminal run conclusion into the workflow's lifetime counters
    /// (`total_runs`, `successful_runs`, `failed_runs`, `last_run_status`,
    /// `last_run_at`).
    fn record_run_outcome(
        &self,
        workflow_id: &WorkflowId,
        conclusion: RunConclusion,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Persist a fully materialized run graph in one transaction and return
    /// the allocated run number.
    ///
    /// The run's `run_number` field is ignored on input; allocation happens
    /// inside the transaction, serialized per workflow, so concurrent
    /// triggers get distinct, gap-free numbers. Either the whole graph
    /// (run + jobs + steps) exists afterwards or none of it does.
    fn create_run_graph(
        &self,
        run: &WorkflowRun,
        jobs: &[WorkflowJob],
        steps: &[WorkflowStep],
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &RunId,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// List runs for a workflow, newest first.
    fn list_runs(
        &self,
        workflow_id: &WorkflowId,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Persist a run state change (status, optional conclusion, timing).
    fn update_run_state(
        &self,
        run_id: &RunId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Get a job by its row UUID.
    fn get_job(
        &self,
        job_row_id: &JobRowId,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowJob>, RepositoryError>> + Send;

    /// List a run's jobs, ascending `job_id`.
    fn list_jobs(
        &self,
        run_id: &RunId,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowJob>, RepositoryError>> + Send;

    /// Persist a job state change (status, optional conclusion, timing).
    fn update_job_state(
        &self,
        job_row_id: &JobRowId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record the runner and container a dispatched job landed on.
    fn assign_runner(
        &self,
        job_row_id: &JobRowId,
        runner_id: &str,
        container_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Get a step by its row UUID.
    fn get_step(
        &self,
        step_row_id: &StepRowId,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowStep>, RepositoryError>> + Send;

    /// List a job's steps, ascending `step_number`.
    fn list_steps(
        &self,
        job_row_id: &JobRowId,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStep>, RepositoryError>> + Send;

    /// Persist a step state change (status, optional conclusion, timing).
    fn update_step_state(
        &self,
        step_row_id: &StepRowId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record a step's captured output, error output, and exit code.
    fn record_step_result(
        &self,
        step_row_id: &StepRowId,
        output: &str,
        error_output: &str,
        exit_code: Option<i32>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
