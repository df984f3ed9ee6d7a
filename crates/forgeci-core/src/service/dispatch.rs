//! Workflow dispatch service.
//!
//! The outer surface of the engine: saving and deleting workflow
//! definitions, turning events into runs, manual dispatch, cancellation,
//! and run status queries. Each accepted trigger is materialized into a run
//! graph and the run executes on its own task, so one slow run never blocks
//! event intake.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgeci_types::error::RepositoryError;
use forgeci_types::event::TriggerEvent;
use forgeci_types::ids::{ProjectId, RunId, UserId, WorkflowId};
use forgeci_types::run::{RunConclusion, RunStatus, WorkflowRun};
use forgeci_types::spec::WorkflowSpec;
use forgeci_types::workflow::{TriggerKind, Workflow};
use serde_json::{json, Value};

use crate::engine::materializer::{MaterializeError, RunMaterializer};
use crate::engine::parser::{self, SpecError};
use crate::engine::reporter::{StateReporter, TransitionError};
use crate::engine::scheduler::RunScheduler;
use crate::engine::trigger::{TriggerError, TriggerEvaluator};
use crate::engine::view::{self, RunStatusView};
use crate::repository::project::{PermissionService, ProjectRepository};
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("user lacks permission to modify workflows in this project")]
    PermissionDenied,

    #[error("workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("invalid workflow definition: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// WorkflowService
// ---------------------------------------------------------------------------

/// Entry point for everything callers do with workflows and runs.
pub struct WorkflowService<R, P, J, E>
where
    R: WorkflowRepository,
    P: PermissionService,
    J: ProjectRepository,
    E: crate::engine::executor::JobExecutor,
{
    repo: Arc<R>,
    projects: Arc<J>,
    permissions: Arc<P>,
    triggers: TriggerEvaluator<R, P>,
    reporter: Arc<StateReporter<R>>,
    scheduler: Arc<RunScheduler<R, E>>,
}

impl<R, P, J, E> WorkflowService<R, P, J, E>
where
    R: WorkflowRepository + 'static,
    P: PermissionService + 'static,
    J: ProjectRepository,
    E: crate::engine::executor::JobExecutor + 'static,
{
    pub fn new(
        repo: Arc<R>,
        projects: Arc<J>,
        permissions: Arc<P>,
        reporter: Arc<StateReporter<R>>,
        scheduler: Arc<RunScheduler<R, E>>,
    ) -> Self {
        Self {
            triggers: TriggerEvaluator::new(Arc::clone(&repo), Arc::clone(&permissions)),
            repo,
            projects,
            permissions,
            reporter,
            scheduler,
        }
    }

    // -----------------------------------------------------------------------
    // Definition lifecycle
    // -----------------------------------------------------------------------

    /// Validate and persist a workflow definition.
    pub async fn save_workflow(
        &self,
        project_id: ProjectId,
        user_id: &UserId,
        name: &str,
        yaml: &str,
    ) -> Result<Workflow, DispatchError> {
        if !self.permissions.can_edit(user_id, &project_id).await? {
            return Err(DispatchError::PermissionDenied);
        }
        let spec = parser::parse(yaml)?;
        let workflow = Workflow::new(
            project_id,
            name,
            yaml,
            spec.trigger_kinds(),
            spec.schedule_cron().map(str::to_string),
        );
        self.repo.save_workflow(&workflow).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            workflow = name,
            jobs = spec.jobs.len(),
            "workflow saved"
        );
        Ok(workflow)
    }

    /// Delete a workflow and its run history.
    pub async fn delete_workflow(
        &self,
        workflow_id: &WorkflowId,
        user_id: &UserId,
    ) -> Result<(), DispatchError> {
        let workflow = self
            .repo
            .get_workflow(workflow_id)
            .await?
            .ok_or(DispatchError::WorkflowNotFound(*workflow_id))?;
        if !self
            .permissions
            .can_edit(user_id, &workflow.project_id)
            .await?
        {
            return Err(DispatchError::PermissionDenied);
        }
        self.repo.delete_workflow(workflow_id).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Triggering
    // -----------------------------------------------------------------------

    /// Evaluate an event against the project's workflows, materialize a run
    /// for each match, and start them. Returns the run ids that started.
    pub async fn handle_event(&self, event: &TriggerEvent) -> Result<Vec<RunId>, DispatchError> {
        let matched = self.triggers.evaluate(event).await?;
        let org_id = self.projects.org_of(&event.project_id).await?;

        let mut run_ids = Vec::with_capacity(matched.len());
        for (workflow, spec) in matched {
            let run = RunMaterializer::materialize(
                self.repo.as_ref(),
                &workflow,
                &spec,
                event.kind,
                event.actor_user_id,
                event.payload.clone(),
            )
            .await?;
            run_ids.push(run.id);
            self.spawn_run(run, spec, workflow.project_id, org_id);
        }
        Ok(run_ids)
    }

    /// Dispatch one workflow manually. The trigger payload records the
    /// project's current branch plus any caller-supplied inputs.
    pub async fn dispatch_manual(
        &self,
        workflow_id: &WorkflowId,
        user_id: &UserId,
        inputs: Value,
    ) -> Result<RunId, DispatchError> {
        let workflow = self
            .repo
            .get_workflow(workflow_id)
            .await?
            .ok_or(DispatchError::WorkflowNotFound(*workflow_id))?;
        if !self
            .permissions
            .can_edit(user_id, &workflow.project_id)
            .await?
        {
            return Err(DispatchError::PermissionDenied);
        }
        let spec = parser::parse(&workflow.yaml_content)?;

        let branch = self.projects.current_branch(&workflow.project_id).await?;
        let org_id = self.projects.org_of(&workflow.project_id).await?;
        let payload = json!({ "branch": branch, "inputs": inputs });

        let run = RunMaterializer::materialize(
            self.repo.as_ref(),
            &workflow,
            &spec,
            TriggerKind::Manual,
            Some(*user_id),
            payload,
        )
        .await?;
        let run_id = run.id;
        self.spawn_run(run, spec, workflow.project_id, org_id);
        Ok(run_id)
    }

    /// Handle a schedule tick for one workflow. Returns the started run id,
    /// or `None` when the tick was deduplicated or the workflow no longer
    /// qualifies.
    pub async fn handle_schedule_tick(
        &self,
        workflow_id: &WorkflowId,
        fired_at: DateTime<Utc>,
    ) -> Result<Option<RunId>, DispatchError> {
        let Some((workflow, spec)) = self
            .triggers
            .evaluate_schedule(workflow_id, fired_at)
            .await?
        else {
            return Ok(None);
        };
        let org_id = self.projects.org_of(&workflow.project_id).await?;
        let run = RunMaterializer::materialize(
            self.repo.as_ref(),
            &workflow,
            &spec,
            TriggerKind::Schedule,
            None,
            json!({ "fired_at": fired_at }),
        )
        .await?;
        let run_id = run.id;
        self.spawn_run(run, spec, workflow.project_id, org_id);
        Ok(Some(run_id))
    }

    fn spawn_run(
        &self,
        run: WorkflowRun,
        spec: WorkflowSpec,
        project_id: ProjectId,
        org_id: Option<forgeci_types::ids::OrgId>,
    ) {
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move {
            let run_id = run.id;
            if let Err(err) = scheduler.execute_run(run, &spec, project_id, org_id).await {
                tracing::error!(run_id = %run_id, error = %err, "run execution failed");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Cancellation and status
    // -----------------------------------------------------------------------

    /// Cancel a run. Safe to call at any point in the run's life: an
    /// executing run is interrupted, a queued run is concluded cancelled
    /// directly, and a terminal run is left untouched. Returns whether this
    /// call changed anything.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<bool, DispatchError> {
        if self.scheduler.cancel(run_id) {
            return Ok(true);
        }

        let run = self
            .repo
            .get_run(run_id)
            .await?
            .ok_or(DispatchError::RunNotFound(*run_id))?;
        if run.status.is_terminal() {
            return Ok(false);
        }

        // The run was materialized but never picked up by the scheduler.
        for job in self.repo.list_jobs(run_id).await? {
            if job.status == RunStatus::Queued {
                self.reporter
                    .transition_job(
                        run_id,
                        &job.id,
                        RunStatus::Cancelled,
                        Some(RunConclusion::Cancelled),
                    )
                    .await?;
                for step in self.repo.list_steps(&job.id).await? {
                    if step.status == RunStatus::Queued {
                        self.reporter
                            .transition_step(
                                run_id,
                                &step.id,
                                RunStatus::Cancelled,
                                Some(RunConclusion::Cancelled),
                            )
                            .await?;
                    }
                }
            }
        }
        self.reporter
            .transition_run(run_id, RunStatus::Cancelled, Some(RunConclusion::Cancelled))
            .await?;
        Ok(true)
    }

    /// Aggregate status of a run and its job/step tree.
    pub async fn run_status(&self, run_id: &RunId) -> Result<RunStatusView, DispatchError> {
        view::run_status_view(self.repo.as_ref(), run_id)
            .await?
            .ok_or(DispatchError::RunNotFound(*run_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ShellJobExecutor;
    use crate::engine::scheduler::SchedulerConfig;
    use crate::repository::memory::{
        MemorySecretStore, MemoryWorkflowRepository, StaticPermissionService,
        StaticProjectRepository,
    };
    use std::time::Duration;

    type Service = WorkflowService<
        MemoryWorkflowRepository,
        StaticPermissionService,
        StaticProjectRepository,
        ShellJobExecutor<MemoryWorkflowRepository, MemorySecretStore>,
    >;

    fn service(allow: bool) -> (Arc<MemoryWorkflowRepository>, Service) {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let store = Arc::new(MemorySecretStore::new());
        let reporter = Arc::new(StateReporter::new(Arc::clone(&repo)));
        let executor = Arc::new(ShellJobExecutor::new(Arc::clone(&reporter), store));
        let scheduler = Arc::new(RunScheduler::new(
            Arc::clone(&reporter),
            executor,
            SchedulerConfig::default(),
        ));
        let permissions = Arc::new(if allow {
            StaticPermissionService::allow_all()
        } else {
            StaticPermissionService::deny_all()
        });
        let svc = WorkflowService::new(
            Arc::clone(&repo),
            Arc::new(StaticProjectRepository::new("main")),
            permissions,
            reporter,
            scheduler,
        );
        (repo, svc)
    }

    async fn wait_terminal(svc: &Service, run_id: &RunId) -> RunStatusView {
        for _ in 0..100 {
            let view = svc.run_status(run_id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run {run_id} did not reach a terminal state");
    }

    const ECHO_WORKFLOW: &str = r#"
on: [push, manual]
jobs:
  build:
    steps:
      - run: echo building
"#;

    #[tokio::test]
    async fn test_save_workflow_rejects_invalid_yaml() {
        let (_, svc) = service(true);
        let err = svc
            .save_workflow(ProjectId::new(), &UserId::new(), "bad", "on: [push]\njobs: {}")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_save_workflow_requires_permission() {
        let (_, svc) = service(false);
        let err = svc
            .save_workflow(ProjectId::new(), &UserId::new(), "ci", ECHO_WORKFLOW)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PermissionDenied));
    }

    #[tokio::test]
    async fn test_push_event_runs_to_completion() {
        let (_, svc) = service(true);
        let project_id = ProjectId::new();
        svc.save_workflow(project_id, &UserId::new(), "ci", ECHO_WORKFLOW)
            .await
            .unwrap();

        let event = TriggerEvent::new(TriggerKind::Push, project_id)
            .with_payload(json!({"branch": "main"}));
        let run_ids = svc.handle_event(&event).await.unwrap();
        assert_eq!(run_ids.len(), 1);

        let view = wait_terminal(&svc, &run_ids[0]).await;
        assert_eq!(view.conclusion, Some(RunConclusion::Success));
        assert_eq!(view.jobs[0].steps[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_manual_dispatch_carries_branch_payload() {
        let (repo, svc) = service(true);
        let project_id = ProjectId::new();
        let wf = svc
            .save_workflow(project_id, &UserId::new(), "ci", ECHO_WORKFLOW)
            .await
            .unwrap();

        let run_id = svc
            .dispatch_manual(&wf.id, &UserId::new(), json!({"target": "prod"}))
            .await
            .unwrap();
        wait_terminal(&svc, &run_id).await;

        let run = repo.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.trigger_event, TriggerKind::Manual);
        assert_eq!(run.trigger_data["branch"], "main");
        assert_eq!(run.trigger_data["inputs"]["target"], "prod");
        assert!(run.trigger_user.is_some());
    }

    #[tokio::test]
    async fn test_cancel_queued_run_and_idempotence() {
        let (repo, svc) = service(true);
        let project_id = ProjectId::new();
        let wf = svc
            .save_workflow(project_id, &UserId::new(), "ci", ECHO_WORKFLOW)
            .await
            .unwrap();

        // Materialize without handing the run to the scheduler.
        let spec = parser::parse(ECHO_WORKFLOW).unwrap();
        let run = RunMaterializer::materialize(
            repo.as_ref(),
            &wf,
            &spec,
            TriggerKind::Push,
            None,
            Value::Null,
        )
        .await
        .unwrap();

        assert!(svc.cancel_run(&run.id).await.unwrap());
        let view = svc.run_status(&run.id).await.unwrap();
        assert_eq!(view.conclusion, Some(RunConclusion::Cancelled));
        assert_eq!(view.jobs[0].conclusion, Some(RunConclusion::Cancelled));
        assert_eq!(view.jobs[0].steps[0].conclusion, Some(RunConclusion::Cancelled));

        // A second cancel changes nothing and raises no error.
        assert!(!svc.cancel_run(&run.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_errors() {
        let (_, svc) = service(true);
        assert!(matches!(
            svc.cancel_run(&RunId::new()).await.unwrap_err(),
            DispatchError::RunNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_workflow_requires_permission() {
        let (repo, svc) = service(true);
        let project_id = ProjectId::new();
        let wf = svc
            .save_workflow(project_id, &UserId::new(), "ci", ECHO_WORKFLOW)
            .await
            .unwrap();

        // A denying service over the same repository.
        let store = Arc::new(MemorySecretStore::new());
        let reporter = Arc::new(StateReporter::new(Arc::clone(&repo)));
        let executor = Arc::new(ShellJobExecutor::new(Arc::clone(&reporter), store));
        let scheduler = Arc::new(RunScheduler::new(
            Arc::clone(&reporter),
            executor,
            SchedulerConfig::default(),
        ));
        let denying = WorkflowService::new(
            Arc::clone(&repo),
            Arc::new(StaticProjectRepository::new("main")),
            Arc::new(StaticPermissionService::deny_all()),
            reporter,
            scheduler,
        );
        assert!(matches!(
            denying.delete_workflow(&wf.id, &UserId::new()).await.unwrap_err(),
            DispatchError::PermissionDenied
        ));

        svc.delete_workflow(&wf.id, &UserId::new()).await.unwrap();
        assert!(repo.get_workflow(&wf.id).await.unwrap().is_none());
    }
}
