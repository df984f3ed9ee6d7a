//! In-process repository implementations.
//!
//! Backing storage is a plain `HashMap` behind one mutex, which trivially
//! gives the per-workflow run-number serialization and the transactional
//! run-graph insert the trait contract demands. Used by the engine's own
//! integration tests; production deployments use the SQLite implementations
//! in forgeci-infra.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use forgeci_types::error::{RepositoryError, SecretError};
use forgeci_types::ids::{JobRowId, OrgId, ProjectId, RunId, StepRowId, UserId, WorkflowId};
use forgeci_types::run::{
    RunConclusion, RunStatus, WorkflowJob, WorkflowRun, WorkflowStep,
};
use forgeci_types::secret::{Redacted, SecretName, SecretScope, WorkflowSecret};
use forgeci_types::workflow::Workflow;

use super::project::{PermissionService, ProjectRepository};
use super::secret::SecretStore;
use super::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// MemoryWorkflowRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Store {
    workflows: HashMap<WorkflowId, Workflow>,
    runs: HashMap<RunId, WorkflowRun>,
    jobs: HashMap<JobRowId, WorkflowJob>,
    steps: HashMap<StepRowId, WorkflowStep>,
}

/// In-memory [`WorkflowRepository`].
#[derive(Default)]
pub struct MemoryWorkflowRepository {
    inner: Mutex<Store>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        // Lock poisoning only happens if a holder panicked; propagate.
        self.inner.lock().expect("repository mutex poisoned")
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        self.lock().workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.lock().workflows.get(id).cloned())
    }

    async fn list_enabled_workflows(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let store = self.lock();
        let mut workflows: Vec<Workflow> = store
            .workflows
            .values()
            .filter(|w| w.project_id == *project_id && w.enabled)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    async fn list_scheduled_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let store = self.lock();
        let mut workflows: Vec<Workflow> = store
            .workflows
            .values()
            .filter(|w| w.enabled && w.schedule_cron.is_some())
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> Result<bool, RepositoryError> {
        let mut store = self.lock();
        if store.workflows.remove(id).is_none() {
            return Ok(false);
        }
        // Cascade: runs, their jobs, their steps.
        let run_ids: Vec<RunId> = store
            .runs
            .values()
            .filter(|r| r.workflow_id == *id)
            .map(|r| r.id)
            .collect();
        for run_id in &run_ids {
            store.runs.remove(run_id);
        }
        let job_ids: Vec<JobRowId> = store
            .jobs
            .values()
            .filter(|j| run_ids.contains(&j.run_id))
            .map(|j| j.id)
            .collect();
        for job_id in &job_ids {
            store.jobs.remove(job_id);
        }
        store.steps.retain(|_, s| !job_ids.contains(&s.job_row_id));
        Ok(true)
    }

    async fn record_run_outcome(
        &self,
        workflow_id: &WorkflowId,
        conclusion: RunConclusion,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        let workflow = store
            .workflows
            .get_mut(workflow_id)
            .ok_or(RepositoryError::NotFound)?;
        workflow.total_runs += 1;
        match conclusion {
            RunConclusion::Success => workflow.successful_runs += 1,
            RunConclusion::Failure | RunConclusion::TimedOut => workflow.failed_runs += 1,
            RunConclusion::Cancelled | RunConclusion::Skipped => {}
        }
        workflow.last_run_status = Some(conclusion);
        workflow.last_run_at = Some(at);
        workflow.updated_at = at;
        Ok(())
    }

    async fn create_run_graph(
        &self,
        run: &WorkflowRun,
        jobs: &[WorkflowJob],
        steps: &[WorkflowStep],
    ) -> Result<u64, RepositoryError> {
        let mut store = self.lock();
        if store.runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict(format!(
                "run {} already exists",
                run.id
            )));
        }
        // One lock covers allocation plus insert, so concurrent triggers for
        // the same workflow see gap-free, distinct numbers.
        let run_number = store
            .runs
            .values()
            .filter(|r| r.workflow_id == run.workflow_id)
            .map(|r| r.run_number)
            .max()
            .unwrap_or(0)
            + 1;
        let mut run = run.clone();
        run.run_number = run_number;
        store.runs.insert(run.id, run);
        for job in jobs {
            store.jobs.insert(job.id, job.clone());
        }
        for step in steps {
            store.steps.insert(step.id, step.clone());
        }
        Ok(run_number)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.lock().runs.get(run_id).cloned())
    }

    async fn list_runs(
        &self,
        workflow_id: &WorkflowId,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let store = self.lock();
        let mut runs: Vec<WorkflowRun> = store
            .runs
            .values()
            .filter(|r| r.workflow_id == *workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.run_number.cmp(&a.run_number));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn update_run_state(
        &self,
        run_id: &RunId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        let run = store.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.status = status;
        if conclusion.is_some() {
            run.conclusion = conclusion;
        }
        if started_at.is_some() {
            run.started_at = started_at;
        }
        if completed_at.is_some() {
            run.completed_at = completed_at;
        }
        if duration_seconds.is_some() {
            run.duration_seconds = duration_seconds;
        }
        Ok(())
    }

    async fn get_job(&self, job_row_id: &JobRowId) -> Result<Option<WorkflowJob>, RepositoryError> {
        Ok(self.lock().jobs.get(job_row_id).cloned())
    }

    async fn list_jobs(&self, run_id: &RunId) -> Result<Vec<WorkflowJob>, RepositoryError> {
        let store = self.lock();
        let mut jobs: Vec<WorkflowJob> = store
            .jobs
            .values()
            .filter(|j| j.run_id == *run_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(jobs)
    }

    async fn update_job_state(
        &self,
        job_row_id: &JobRowId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        let job = store
            .jobs
            .get_mut(job_row_id)
            .ok_or(RepositoryError::NotFound)?;
        job.status = status;
        if conclusion.is_some() {
            job.conclusion = conclusion;
        }
        if started_at.is_some() {
            job.started_at = started_at;
        }
        if completed_at.is_some() {
            job.completed_at = completed_at;
        }
        if duration_seconds.is_some() {
            job.duration_seconds = duration_seconds;
        }
        Ok(())
    }

    async fn assign_runner(
        &self,
        job_row_id: &JobRowId,
        runner_id: &str,
        container_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        let job = store
            .jobs
            .get_mut(job_row_id)
            .ok_or(RepositoryError::NotFound)?;
        job.runner_id = Some(runner_id.to_string());
        job.container_id = container_id.map(String::from);
        Ok(())
    }

    async fn get_step(
        &self,
        step_row_id: &StepRowId,
    ) -> Result<Option<WorkflowStep>, RepositoryError> {
        Ok(self.lock().steps.get(step_row_id).cloned())
    }

    async fn list_steps(
        &self,
        job_row_id: &JobRowId,
    ) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let store = self.lock();
        let mut steps: Vec<WorkflowStep> = store
            .steps
            .values()
            .filter(|s| s.job_row_id == *job_row_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    async fn update_step_state(
        &self,
        step_row_id: &StepRowId,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        let step = store
            .steps
            .get_mut(step_row_id)
            .ok_or(RepositoryError::NotFound)?;
        step.status = status;
        if conclusion.is_some() {
            step.conclusion = conclusion;
        }
        if started_at.is_some() {
            step.started_at = started_at;
        }
        if completed_at.is_some() {
            step.completed_at = completed_at;
        }
        if duration_seconds.is_some() {
            step.duration_seconds = duration_seconds;
        }
        Ok(())
    }

    async fn record_step_result(
        &self,
        step_row_id: &StepRowId,
        output: &str,
        error_output: &str,
        exit_code: Option<i32>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        let step = store
            .steps
            .get_mut(step_row_id)
            .ok_or(RepositoryError::NotFound)?;
        step.output = Some(output.to_string());
        step.error_output = Some(error_output.to_string());
        step.exit_code = exit_code;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySecretStore
// ---------------------------------------------------------------------------

/// In-memory [`SecretStore`]. Values are held as [`Redacted`] only.
#[derive(Default)]
pub struct MemorySecretStore {
    inner: Mutex<HashMap<(SecretScope, SecretName), (Redacted, WorkflowSecret)>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    async fn get(
        &self,
        name: &SecretName,
        scope: &SecretScope,
    ) -> Result<Option<Redacted>, SecretError> {
        let store = self.inner.lock().expect("secret store mutex poisoned");
        Ok(store
            .get(&(scope.clone(), name.clone()))
            .map(|(value, _)| value.clone()))
    }

    async fn set(
        &self,
        name: &SecretName,
        value: &Redacted,
        scope: &SecretScope,
    ) -> Result<(), SecretError> {
        let mut store = self.inner.lock().expect("secret store mutex poisoned");
        let now = Utc::now();
        let entry = WorkflowSecret {
            name: name.clone(),
            scope: scope.clone(),
            created_at: now,
            updated_at: now,
            last_used_at: None,
        };
        store.insert((scope.clone(), name.clone()), (value.clone(), entry));
        Ok(())
    }

    async fn delete(&self, name: &SecretName, scope: &SecretScope) -> Result<bool, SecretError> {
        let mut store = self.inner.lock().expect("secret store mutex poisoned");
        Ok(store.remove(&(scope.clone(), name.clone())).is_some())
    }

    async fn list(&self, scope: &SecretScope) -> Result<Vec<WorkflowSecret>, SecretError> {
        let store = self.inner.lock().expect("secret store mutex poisoned");
        let mut entries: Vec<WorkflowSecret> = store
            .values()
            .filter(|(_, entry)| entry.scope == *scope)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(entries)
    }

    async fn touch(
        &self,
        name: &SecretName,
        scope: &SecretScope,
        at: DateTime<Utc>,
    ) -> Result<(), SecretError> {
        let mut store = self.inner.lock().expect("secret store mutex poisoned");
        if let Some((_, entry)) = store.get_mut(&(scope.clone(), name.clone())) {
            entry.last_used_at = Some(at);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collaborator stubs
// ---------------------------------------------------------------------------

/// [`ProjectRepository`] that answers a fixed branch (and optional org) for
/// every project.
pub struct StaticProjectRepository {
    branch: String,
    org_id: Option<OrgId>,
}

impl StaticProjectRepository {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            org_id: None,
        }
    }

    pub fn with_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }
}

impl ProjectRepository for StaticProjectRepository {
    async fn current_branch(&self, _project_id: &ProjectId) -> Result<String, RepositoryError> {
        Ok(self.branch.clone())
    }

    async fn org_of(&self, _project_id: &ProjectId) -> Result<Option<OrgId>, RepositoryError> {
        Ok(self.org_id)
    }
}

/// [`PermissionService`] with a fixed answer.
pub struct StaticPermissionService {
    allow: bool,
}

impl StaticPermissionService {
    pub fn allow_all() -> Self {
        Self { allow: true }
    }

    pub fn deny_all() -> Self {
        Self { allow: false }
    }
}

impl PermissionService for StaticPermissionService {
    async fn can_edit(
        &self,
        _user_id: &UserId,
        _project_id: &ProjectId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.allow)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use forgeci_types::workflow::TriggerKind;
    use serde_json::Value;

    fn workflow(project_id: ProjectId) -> Workflow {
        Workflow::new(
            project_id,
            "ci",
            "on: [push]\njobs: {}",
            vec![TriggerKind::Push],
            None,
        )
    }

    fn run_for(workflow_id: WorkflowId) -> WorkflowRun {
        WorkflowRun {
            id: RunId::new(),
            workflow_id,
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
        }
    }

    // -----------------------------------------------------------------------
    // Run numbers
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_run_numbers_monotonic_per_workflow() {
        let repo = MemoryWorkflowRepository::new();
        let wf = workflow(ProjectId::new());
        repo.save_workflow(&wf).await.unwrap();

        for expected in 1..=3u64 {
            let n = repo
                .create_run_graph(&run_for(wf.id), &[], &[])
                .await
                .unwrap();
            assert_eq!(n, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_triggers_get_distinct_gap_free_numbers() {
        let repo = std::sync::Arc::new(MemoryWorkflowRepository::new());
        let wf = workflow(ProjectId::new());
        repo.save_workflow(&wf).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let repo = std::sync::Arc::clone(&repo);
            let run = run_for(wf.id);
            tasks.spawn(async move { repo.create_run_graph(&run, &[], &[]).await.unwrap() });
        }

        let mut numbers = Vec::new();
        while let Some(n) = tasks.join_next().await {
            numbers.push(n.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_run_numbers_independent_across_workflows() {
        let repo = MemoryWorkflowRepository::new();
        let a = workflow(ProjectId::new());
        let b = workflow(ProjectId::new());
        repo.save_workflow(&a).await.unwrap();
        repo.save_workflow(&b).await.unwrap();

        assert_eq!(repo.create_run_graph(&run_for(a.id), &[], &[]).await.unwrap(), 1);
        assert_eq!(repo.create_run_graph(&run_for(b.id), &[], &[]).await.unwrap(), 1);
        assert_eq!(repo.create_run_graph(&run_for(a.id), &[], &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_run_id_conflicts() {
        let repo = MemoryWorkflowRepository::new();
        let wf = workflow(ProjectId::new());
        repo.save_workflow(&wf).await.unwrap();

        let run = run_for(wf.id);
        repo.create_run_graph(&run, &[], &[]).await.unwrap();
        let err = repo.create_run_graph(&run, &[], &[]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    // -----------------------------------------------------------------------
    // Counters and cascade
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_record_run_outcome_updates_counters() {
        let repo = MemoryWorkflowRepository::new();
        let wf = workflow(ProjectId::new());
        repo.save_workflow(&wf).await.unwrap();

        repo.record_run_outcome(&wf.id, RunConclusion::Success, Utc::now())
            .await
            .unwrap();
        repo.record_run_outcome(&wf.id, RunConclusion::Failure, Utc::now())
            .await
            .unwrap();

        let wf = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(wf.total_runs, 2);
        assert_eq!(wf.successful_runs, 1);
        assert_eq!(wf.failed_runs, 1);
        assert_eq!(wf.last_run_status, Some(RunConclusion::Failure));
        assert!(wf.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_cascades_runs() {
        let repo = MemoryWorkflowRepository::new();
        let wf = workflow(ProjectId::new());
        repo.save_workflow(&wf).await.unwrap();
        let run = run_for(wf.id);
        repo.create_run_graph(&run, &[], &[]).await.unwrap();

        assert!(repo.delete_workflow(&wf.id).await.unwrap());
        assert!(repo.get_run(&run.id).await.unwrap().is_none());
        assert!(!repo.delete_workflow(&wf.id).await.unwrap());
    }

    // -----------------------------------------------------------------------
    // Secrets
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_secret_store_roundtrip_and_touch() {
        let store = MemorySecretStore::new();
        let scope = SecretScope::Project(ProjectId::new());
        let name = SecretName::new("API_KEY").unwrap();

        assert!(store.get(&name, &scope).await.unwrap().is_none());
        store
            .set(&name, &Redacted::new("tok-123"), &scope)
            .await
            .unwrap();
        let value = store.get(&name, &scope).await.unwrap().unwrap();
        assert_eq!(value.expose(), "tok-123");

        store.touch(&name, &scope, Utc::now()).await.unwrap();
        let entries = store.list(&scope).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].last_used_at.is_some());

        assert!(store.delete(&name, &scope).await.unwrap());
        assert!(!store.delete(&name, &scope).await.unwrap());
    }
}
