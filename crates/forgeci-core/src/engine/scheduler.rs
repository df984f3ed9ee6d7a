//! Run scheduling: Kahn-style dependency-ordered job dispatch.
//!
//! The scheduler drives one run from queued to terminal. Each iteration it
//! dispatches every job whose dependencies are satisfied, ascending by
//! `job_id` when several become ready together, then waits for a completion
//! to unlock more work. Jobs whose dependencies terminated unsatisfied are
//! skipped, which cascades transitively through their dependents.
//!
//! Concurrency is bounded twice: a global semaphore shared across runs and a
//! per-run semaphore. Permits are acquired in dispatch order inside the loop
//! and travel into the spawned task, so ordering stays deterministic and a
//! slow permit never deadlocks the loop (running jobs release permits
//! independently).
//!
//! Cancellation is cooperative and idempotent: the run's token fans out to
//! in-flight executors while still-queued jobs are concluded `cancelled`
//! directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use forgeci_types::ids::{OrgId, ProjectId, RunId};
use forgeci_types::run::{RunConclusion, RunStatus, WorkflowJob, WorkflowRun};
use forgeci_types::secret::SecretName;
use forgeci_types::spec::WorkflowSpec;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::executor::{ExecutorError, JobContext, JobExecutor};
use crate::engine::materializer::base_job_id;
use crate::engine::reporter::{StateReporter, TransitionError};
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs in flight across all runs.
    pub max_concurrent_jobs: usize,
    /// Jobs in flight within a single run.
    pub max_jobs_per_run: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 16,
            max_jobs_per_run: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("job executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("job task panicked: {0}")]
    JobPanicked(String),

    /// Queued jobs remain but nothing is ready or in flight. Indicates a
    /// graph that escaped validation.
    #[error("run stalled with {0} queued jobs")]
    Stalled(usize),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives materialized runs to completion through a [`JobExecutor`].
pub struct RunScheduler<R: WorkflowRepository, E: JobExecutor> {
    reporter: Arc<StateReporter<R>>,
    executor: Arc<E>,
    global_permits: Arc<Semaphore>,
    per_run_limit: usize,
    cancel_tokens: DashMap<RunId, CancellationToken>,
}

/// In-memory job tracking during one run.
struct JobSlot {
    job: WorkflowJob,
    conclusion: Option<RunConclusion>,
}

impl<R: WorkflowRepository, E: JobExecutor + 'static> RunScheduler<R, E> {
    pub fn new(reporter: Arc<StateReporter<R>>, executor: Arc<E>, config: SchedulerConfig) -> Self {
        Self {
            reporter,
            executor,
            global_permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            per_run_limit: config.max_jobs_per_run,
            cancel_tokens: DashMap::new(),
        }
    }

    /// Request cancellation of a run. Returns `false` if the run is not
    /// currently executing. Safe to call repeatedly.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.cancel_tokens.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute a materialized run to its terminal state and return the run
    /// conclusion.
    pub async fn execute_run(
        &self,
        run: WorkflowRun,
        spec: &WorkflowSpec,
        project_id: ProjectId,
        org_id: Option<OrgId>,
    ) -> Result<RunConclusion, SchedulerError> {
        let cancel = CancellationToken::new();
        self.cancel_tokens.insert(run.id, cancel.clone());

        let result = self
            .drive(run.clone(), spec, project_id, org_id, cancel)
            .await;
        self.cancel_tokens.remove(&run.id);

        match result {
            Ok(conclusion) => {
                let status = status_for(conclusion);
                self.reporter
                    .transition_run(&run.id, status, Some(conclusion))
                    .await?;
                Ok(conclusion)
            }
            Err(err) => {
                // Best effort: conclude the run failed so it never sticks in
                // progress. The original error still propagates.
                tracing::error!(run_id = %run.id, error = %err, "run aborted");
                let _ = self
                    .reporter
                    .transition_run(&run.id, RunStatus::Failed, Some(RunConclusion::Failure))
                    .await;
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        run: WorkflowRun,
        spec: &WorkflowSpec,
        project_id: ProjectId,
        org_id: Option<OrgId>,
        cancel: CancellationToken,
    ) -> Result<RunConclusion, SchedulerError> {
        self.reporter
            .transition_run(&run.id, RunStatus::InProgress, None)
            .await?;

        let jobs = self
            .reporter
            .repo()
            .list_jobs(&run.id)
            .await
            .map_err(TransitionError::from)?;
        let mut slots: BTreeMap<String, JobSlot> = jobs
            .into_iter()
            .map(|job| (job.job_id.clone(), JobSlot { job, conclusion: None }))
            .collect();

        let run_permits = Arc::new(Semaphore::new(self.per_run_limit));
        let mut in_flight: JoinSet<(String, Result<RunConclusion, ExecutorError>)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                self.cancel_queued(&run, &mut slots).await?;
            } else {
                // Skip jobs whose dependencies terminated unsatisfied; repeat
                // until the cascade settles.
                loop {
                    let doomed: Vec<String> = slots
                        .values()
                        .filter(|slot| {
                            slot.conclusion.is_none()
                                && slot.job.status == RunStatus::Queued
                                && dependencies_unsatisfied(&slot.job, &slots)
                        })
                        .map(|slot| slot.job.job_id.clone())
                        .collect();
                    if doomed.is_empty() {
                        break;
                    }
                    for job_id in doomed {
                        self.conclude_job(&run, &mut slots, &job_id, RunConclusion::Skipped)
                            .await?;
                    }
                }

                // Dispatch ready jobs ascending by job_id.
                let ready: Vec<String> = slots
                    .values()
                    .filter(|slot| {
                        slot.job.status == RunStatus::Queued
                            && dependencies_satisfied(&slot.job, &slots)
                    })
                    .map(|slot| slot.job.job_id.clone())
                    .collect();

                for job_id in ready {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let run_permit = Arc::clone(&run_permits)
                        .acquire_owned()
                        .await
                        .map_err(|_| SchedulerError::Stalled(0))?;
                    let global_permit = Arc::clone(&self.global_permits)
                        .acquire_owned()
                        .await
                        .map_err(|_| SchedulerError::Stalled(0))?;

                    let slot = slots
                        .get_mut(&job_id)
                        .ok_or(SchedulerError::Stalled(0))?;
                    slot.job = self
                        .reporter
                        .transition_job(&run.id, &slot.job.id, RunStatus::InProgress, None)
                        .await?;

                    let ctx = JobContext {
                        run: run.clone(),
                        job: slot.job.clone(),
                        secrets: declared_secrets(spec, &job_id),
                        project_id,
                        org_id,
                        cancel: cancel.clone(),
                    };
                    let executor = Arc::clone(&self.executor);
                    in_flight.spawn(async move {
                        let result = executor.execute(ctx).await;
                        drop(run_permit);
                        drop(global_permit);
                        (job_id, result)
                    });
                }
            }

            let queued = slots
                .values()
                .filter(|slot| slot.job.status == RunStatus::Queued)
                .count();

            match in_flight.join_next().await {
                Some(Ok((job_id, Ok(conclusion)))) => {
                    self.conclude_job(&run, &mut slots, &job_id, conclusion)
                        .await?;
                }
                Some(Ok((_, Err(err)))) => {
                    cancel.cancel();
                    while in_flight.join_next().await.is_some() {}
                    return Err(err.into());
                }
                Some(Err(join_err)) => {
                    cancel.cancel();
                    while in_flight.join_next().await.is_some() {}
                    return Err(SchedulerError::JobPanicked(join_err.to_string()));
                }
                None => {
                    if queued > 0 {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        return Err(SchedulerError::Stalled(queued));
                    }
                    break;
                }
            }
        }

        Ok(run_conclusion(&slots, cancel.is_cancelled()))
    }

    /// Conclude a job and mark its still-queued steps the same way.
    async fn conclude_job(
        &self,
        run: &WorkflowRun,
        slots: &mut BTreeMap<String, JobSlot>,
        job_id: &str,
        conclusion: RunConclusion,
    ) -> Result<(), SchedulerError> {
        let slot = slots.get_mut(job_id).ok_or(SchedulerError::Stalled(0))?;
        slot.job = self
            .reporter
            .transition_job(&run.id, &slot.job.id, status_for(conclusion), Some(conclusion))
            .await?;
        slot.conclusion = Some(conclusion);

        if matches!(conclusion, RunConclusion::Skipped | RunConclusion::Cancelled) {
            let steps = self
                .reporter
                .repo()
                .list_steps(&slot.job.id)
                .await
                .map_err(TransitionError::from)?;
            for step in steps {
                if step.status == RunStatus::Queued {
                    self.reporter
                        .transition_step(&run.id, &step.id, status_for(conclusion), Some(conclusion))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn cancel_queued(
        &self,
        run: &WorkflowRun,
        slots: &mut BTreeMap<String, JobSlot>,
    ) -> Result<(), SchedulerError> {
        let queued: Vec<String> = slots
            .values()
            .filter(|slot| slot.job.status == RunStatus::Queued)
            .map(|slot| slot.job.job_id.clone())
            .collect();
        for job_id in queued {
            self.conclude_job(run, slots, &job_id, RunConclusion::Cancelled)
                .await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dependency and conclusion rules
// ---------------------------------------------------------------------------

/// A dependency is satisfied once it concluded `success`, or once it reached
/// any terminal conclusion when the dependent tolerates failed dependencies.
fn dependencies_satisfied(job: &WorkflowJob, slots: &BTreeMap<String, JobSlot>) -> bool {
    job.depends_on.iter().all(|dep| {
        slots
            .get(dep)
            .and_then(|slot| slot.conclusion)
            .is_some_and(|conclusion| {
                job.tolerate_failed_dependencies || conclusion == RunConclusion::Success
            })
    })
}

/// A dependency terminated without satisfying the job, which can never be
/// undone; the job is doomed to skip.
fn dependencies_unsatisfied(job: &WorkflowJob, slots: &BTreeMap<String, JobSlot>) -> bool {
    if job.tolerate_failed_dependencies {
        return false;
    }
    job.depends_on.iter().any(|dep| {
        slots
            .get(dep)
            .and_then(|slot| slot.conclusion)
            .is_some_and(|conclusion| conclusion != RunConclusion::Success)
    })
}

fn status_for(conclusion: RunConclusion) -> RunStatus {
    match conclusion {
        RunConclusion::Success | RunConclusion::Skipped => RunStatus::Completed,
        RunConclusion::Failure | RunConclusion::TimedOut => RunStatus::Failed,
        RunConclusion::Cancelled => RunStatus::Cancelled,
    }
}

/// Fold job conclusions into the run conclusion. Skipped jobs do not fail a
/// run; any failure or timeout does.
fn run_conclusion(slots: &BTreeMap<String, JobSlot>, cancelled: bool) -> RunConclusion {
    if cancelled
        || slots
            .values()
            .any(|slot| slot.conclusion == Some(RunConclusion::Cancelled))
    {
        return RunConclusion::Cancelled;
    }
    if slots.values().any(|slot| {
        matches!(
            slot.conclusion,
            Some(RunConclusion::Failure | RunConclusion::TimedOut)
        )
    }) {
        return RunConclusion::Failure;
    }
    RunConclusion::Success
}

fn declared_secrets(spec: &WorkflowSpec, concrete_job_id: &str) -> Vec<SecretName> {
    spec.jobs
        .get(base_job_id(concrete_job_id))
        .map(|job| {
            job.secrets
                .iter()
                .filter_map(|name| SecretName::new(name).ok())
                .collect()
        })
        .unwrap_or_default()
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
    use forgeci_types::workflow::{TriggerKind, Workflow};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Executor with scripted conclusions per job id, recording dispatch
    /// order. Unscripted jobs succeed immediately.
    struct ScriptedExecutor {
        conclusions: HashMap<String, RunConclusion>,
        delays: HashMap<String, Duration>,
        order: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                conclusions: HashMap::new(),
                delays: HashMap::new(),
                order: Mutex::new(Vec::new()),
            }
        }

        fn concluding(mut self, job_id: &str, conclusion: RunConclusion) -> Self {
            self.conclusions.insert(job_id.to_string(), conclusion);
            self
        }

        fn delaying(mut self, job_id: &str, delay: Duration) -> Self {
            self.delays.insert(job_id.to_string(), delay);
            self
        }

        fn dispatch_order(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    impl JobExecutor for ScriptedExecutor {
        async fn execute(&self, ctx: JobContext) -> Result<RunConclusion, ExecutorError> {
            self.order.lock().unwrap().push(ctx.job.job_id.clone());
            if let Some(delay) = self.delays.get(&ctx.job.job_id) {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = ctx.cancel.cancelled() => return Ok(RunConclusion::Cancelled),
                }
            }
            Ok(self
                .conclusions
                .get(&ctx.job.job_id)
                .copied()
                .unwrap_or(RunConclusion::Success))
        }
    }

    struct Fixture {
        repo: Arc<MemoryWorkflowRepository>,
        spec: WorkflowSpec,
        run: WorkflowRun,
        project_id: ProjectId,
    }

    use forgeci_types::ids::ProjectId;
    use forgeci_types::spec::WorkflowSpec;

    async fn materialized(yaml: &str) -> Fixture {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let spec = parser::parse(yaml).unwrap();
        let project_id = ProjectId::new();
        let wf = Workflow::new(project_id, "ci", yaml, spec.trigger_kinds(), None);
        repo.save_workflow(&wf).await.unwrap();
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
        Fixture {
            repo,
            spec,
            run,
            project_id,
        }
    }

    fn scheduler(
        repo: &Arc<MemoryWorkflowRepository>,
        executor: ScriptedExecutor,
        per_run: usize,
    ) -> RunScheduler<MemoryWorkflowRepository, ScriptedExecutor> {
        RunScheduler::new(
            Arc::new(StateReporter::new(Arc::clone(repo))),
            Arc::new(executor),
            SchedulerConfig {
                max_concurrent_jobs: 16,
                max_jobs_per_run: per_run,
            },
        )
    }

    const DIAMOND: &str = r#"
on: [push]
jobs:
  a:
    steps:
      - run: "true"
  b:
    needs: [a]
    steps:
      - run: "true"
  c:
    needs: [a]
    steps:
      - run: "true"
  d:
    needs: [b, c]
    steps:
      - run: "true"
"#;

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_serial_dispatch_follows_ascending_job_id() {
        let f = materialized(DIAMOND).await;
        let sched = scheduler(&f.repo, ScriptedExecutor::new(), 1);
        let conclusion = sched
            .execute_run(f.run.clone(), &f.spec, f.project_id, None)
            .await
            .unwrap();
        assert_eq!(conclusion, RunConclusion::Success);
        assert_eq!(sched.executor.dispatch_order(), vec!["a", "b", "c", "d"]);

        let run = f.repo.get_run(&f.run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.conclusion, Some(RunConclusion::Success));
    }

    #[tokio::test]
    async fn test_parallel_branches_both_precede_join() {
        let f = materialized(DIAMOND).await;
        let sched = scheduler(&f.repo, ScriptedExecutor::new(), 4);
        sched
            .execute_run(f.run.clone(), &f.spec, f.project_id, None)
            .await
            .unwrap();
        let order = sched.executor.dispatch_order();
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
    }

    // -----------------------------------------------------------------------
    // Failure and skip propagation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_failed_dependency_skips_transitively() {
        let f = materialized(
            r#"
on: [push]
jobs:
  a:
    steps:
      - run: "true"
  b:
    needs: [a]
    steps:
      - run: "true"
  c:
    needs: [b]
    steps:
      - run: "true"
  solo:
    steps:
      - run: "true"
"#,
        )
        .await;
        let executor = ScriptedExecutor::new().concluding("a", RunConclusion::Failure);
        let sched = scheduler(&f.repo, executor, 4);
        let conclusion = sched
            .execute_run(f.run.clone(), &f.spec, f.project_id, None)
            .await
            .unwrap();
        assert_eq!(conclusion, RunConclusion::Failure);

        let jobs = f.repo.list_jobs(&f.run.id).await.unwrap();
        let by_id: HashMap<_, _> = jobs.iter().map(|j| (j.job_id.as_str(), j)).collect();
        assert_eq!(by_id["a"].conclusion, Some(RunConclusion::Failure));
        assert_eq!(by_id["b"].conclusion, Some(RunConclusion::Skipped));
        assert_eq!(by_id["c"].conclusion, Some(RunConclusion::Skipped));
        assert_eq!(by_id["solo"].conclusion, Some(RunConclusion::Success));

        // Skipped jobs carry skipped steps.
        let steps = f.repo.list_steps(&by_id["b"].id).await.unwrap();
        assert_eq!(steps[0].conclusion, Some(RunConclusion::Skipped));
    }

    #[tokio::test]
    async fn test_tolerated_dependency_failure_still_runs() {
        let f = materialized(
            r#"
on: [push]
jobs:
  a:
    steps:
      - run: "true"
  cleanup:
    needs: [a]
    tolerate_failed_dependencies: true
    steps:
      - run: "true"
"#,
        )
        .await;
        let executor = ScriptedExecutor::new().concluding("a", RunConclusion::Failure);
        let sched = scheduler(&f.repo, executor, 4);
        let conclusion = sched
            .execute_run(f.run.clone(), &f.spec, f.project_id, None)
            .await
            .unwrap();
        // The run still fails because `a` failed, but `cleanup` ran.
        assert_eq!(conclusion, RunConclusion::Failure);
        assert!(sched
            .executor
            .dispatch_order()
            .contains(&"cleanup".to_string()));
    }

    #[tokio::test]
    async fn test_timed_out_job_fails_run() {
        let f = materialized(
            "on: [push]\njobs:\n  slow:\n    steps:\n      - run: \"true\"\n",
        )
        .await;
        let executor = ScriptedExecutor::new().concluding("slow", RunConclusion::TimedOut);
        let sched = scheduler(&f.repo, executor, 4);
        let conclusion = sched
            .execute_run(f.run.clone(), &f.spec, f.project_id, None)
            .await
            .unwrap();
        assert_eq!(conclusion, RunConclusion::Failure);

        let jobs = f.repo.list_jobs(&f.run.id).await.unwrap();
        assert_eq!(jobs[0].conclusion, Some(RunConclusion::TimedOut));
        assert_eq!(jobs[0].status, RunStatus::Failed);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_and_queued() {
        let f = materialized(
            r#"
on: [push]
jobs:
  long:
    steps:
      - run: "true"
  after:
    needs: [long]
    steps:
      - run: "true"
"#,
        )
        .await;
        let executor = ScriptedExecutor::new().delaying("long", Duration::from_secs(30));
        let sched = Arc::new(scheduler(&f.repo, executor, 4));

        let handle = {
            let sched = Arc::clone(&sched);
            let run = f.run.clone();
            let spec = f.spec.clone();
            let project_id = f.project_id;
            tokio::spawn(async move { sched.execute_run(run, &spec, project_id, None).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sched.cancel(&f.run.id));

        let conclusion = handle.await.unwrap().unwrap();
        assert_eq!(conclusion, RunConclusion::Cancelled);

        let jobs = f.repo.list_jobs(&f.run.id).await.unwrap();
        assert!(jobs
            .iter()
            .all(|j| j.conclusion == Some(RunConclusion::Cancelled)));

        // Token is gone once the run terminates; further cancels are no-ops.
        assert!(!sched.cancel(&f.run.id));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_noop() {
        let f = materialized(
            "on: [push]\njobs:\n  a:\n    steps:\n      - run: \"true\"\n",
        )
        .await;
        let sched = scheduler(&f.repo, ScriptedExecutor::new(), 4);
        assert!(!sched.cancel(&f.run.id));
    }

    // -----------------------------------------------------------------------
    // Matrix runs
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_matrix_cells_dispatch_in_cell_order() {
        let f = materialized(
            r#"
on: [push]
jobs:
  test:
    matrix:
      os: [linux, macos]
    steps:
      - run: "true"
"#,
        )
        .await;
        let sched = scheduler(&f.repo, ScriptedExecutor::new(), 1);
        let conclusion = sched
            .execute_run(f.run.clone(), &f.spec, f.project_id, None)
            .await
            .unwrap();
        assert_eq!(conclusion, RunConclusion::Success);
        assert_eq!(
            sched.executor.dispatch_order(),
            vec!["test[os=linux]", "test[os=macos]"]
        );
    }
}
