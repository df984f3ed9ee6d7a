//! Job execution: runs a job's steps sequentially on the local shell.
//!
//! The scheduler owns job-level transitions; executors report step-level
//! state and hand back the job conclusion. The [`JobExecutor`] trait is the
//! seam between scheduling and execution, so scheduling behavior is testable
//! with scripted executors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use forgeci_types::error::SecretError;
use forgeci_types::ids::{OrgId, ProjectId};
use forgeci_types::run::{RunConclusion, RunStatus, WorkflowJob, WorkflowRun};
use forgeci_types::secret::SecretName;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::engine::command::{run_command, StepError};
use crate::engine::condition::ConditionEvaluator;
use crate::engine::reporter::{StateReporter, TransitionError};
use crate::engine::secrets::{redact_output, SecretResolver};
use crate::repository::secret::SecretStore;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Trait and context
// ---------------------------------------------------------------------------

/// Everything an executor needs to run one job.
#[derive(Clone)]
pub struct JobContext {
    pub run: WorkflowRun,
    pub job: WorkflowJob,
    /// Secret names the job declared, resolved at execution time.
    pub secrets: Vec<SecretName>,
    pub project_id: ProjectId,
    pub org_id: Option<OrgId>,
    pub cancel: CancellationToken,
}

/// Executes one job and returns its conclusion. Step state is reported from
/// inside; the job's own terminal transition belongs to the caller.
pub trait JobExecutor: Send + Sync {
    fn execute(
        &self,
        ctx: JobContext,
    ) -> impl std::future::Future<Output = Result<RunConclusion, ExecutorError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

// ---------------------------------------------------------------------------
// Shell executor
// ---------------------------------------------------------------------------

/// Runs step commands through `sh -c` with secret injection and output
/// redaction.
pub struct ShellJobExecutor<R: WorkflowRepository, S: SecretStore> {
    reporter: Arc<StateReporter<R>>,
    secrets: SecretResolver<S>,
    conditions: ConditionEvaluator,
}

impl<R: WorkflowRepository, S: SecretStore> ShellJobExecutor<R, S> {
    pub fn new(reporter: Arc<StateReporter<R>>, store: Arc<S>) -> Self {
        Self {
            reporter,
            secrets: SecretResolver::new(store),
            conditions: ConditionEvaluator::new(),
        }
    }

    /// Record the missing-secret error on the job's first step and skip the
    /// rest, so the failure cause survives in the run record.
    async fn fail_on_missing_secret(
        &self,
        ctx: &JobContext,
        name: &str,
    ) -> Result<(), ExecutorError> {
        let steps = self.reporter.repo().list_steps(&ctx.job.id).await
            .map_err(TransitionError::from)?;
        let Some(first) = steps.first() else {
            return Ok(());
        };
        self.reporter
            .transition_step(
                &ctx.run.id,
                &first.id,
                RunStatus::Failed,
                Some(RunConclusion::Failure),
            )
            .await?;
        self.reporter
            .record_step_result(
                &ctx.run.id,
                &first.id,
                "",
                &format!("secret '{name}' not found"),
                None,
            )
            .await?;
        self.skip_remaining_steps(ctx, first.step_number + 1).await
    }

    /// Mark every still-queued step of the job as skipped.
    async fn skip_remaining_steps(
        &self,
        ctx: &JobContext,
        from_step: u32,
    ) -> Result<(), ExecutorError> {
        let steps = self.reporter.repo().list_steps(&ctx.job.id).await
            .map_err(TransitionError::from)?;
        for step in steps {
            if step.step_number >= from_step && step.status == RunStatus::Queued {
                self.reporter
                    .transition_step(
                        &ctx.run.id,
                        &step.id,
                        RunStatus::Completed,
                        Some(RunConclusion::Skipped),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn base_env(ctx: &JobContext) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("FORGECI_RUN_ID".to_string(), ctx.run.id.to_string());
        env.insert(
            "FORGECI_RUN_NUMBER".to_string(),
            ctx.run.run_number.to_string(),
        );
        env.insert("FORGECI_JOB_ID".to_string(), ctx.job.job_id.clone());
        env
    }

    fn condition_context(ctx: &JobContext) -> Value {
        json!({
            "trigger": {
                "event": ctx.run.trigger_event,
                "data": ctx.run.trigger_data,
            },
            "matrix": ctx.job.matrix_values.clone().unwrap_or(Value::Null),
        })
    }
}

impl<R: WorkflowRepository, S: SecretStore> JobExecutor for ShellJobExecutor<R, S> {
    async fn execute(&self, ctx: JobContext) -> Result<RunConclusion, ExecutorError> {
        // Secrets resolve before any step runs; a missing name fails the job
        // with the error recorded on the first step and the rest skipped.
        let resolved = match self
            .secrets
            .resolve(&ctx.secrets, ctx.project_id, ctx.org_id)
            .await
        {
            Ok(resolved) => resolved,
            Err(SecretError::NotFound(name)) => {
                tracing::warn!(
                    run_id = %ctx.run.id,
                    job_id = ctx.job.job_id.as_str(),
                    secret = name.as_str(),
                    "secret not found, failing job"
                );
                self.fail_on_missing_secret(&ctx, &name).await?;
                return Ok(RunConclusion::Failure);
            }
            Err(err) => return Err(err.into()),
        };

        // The shell executor is its own runner; record the assignment so
        // status views can show where the job landed.
        self.reporter
            .repo()
            .assign_runner(&ctx.job.id, &format!("shell:{}", std::process::id()), None)
            .await
            .map_err(TransitionError::from)?;

        let mut env = Self::base_env(&ctx);
        for (name, value) in &resolved {
            env.insert(name.to_string(), value.expose().to_string());
        }
        let context = Self::condition_context(&ctx);

        let steps = self.reporter.repo().list_steps(&ctx.job.id).await
            .map_err(TransitionError::from)?;

        let mut job_succeeding = true;
        let mut timed_out = false;

        for step in steps {
            if ctx.cancel.is_cancelled() {
                self.reporter
                    .transition_step(
                        &ctx.run.id,
                        &step.id,
                        RunStatus::Cancelled,
                        Some(RunConclusion::Cancelled),
                    )
                    .await?;
                continue;
            }

            let should_run = match self.conditions.should_run(
                step.condition.as_deref(),
                job_succeeding,
                &context,
            ) {
                Ok(decision) => decision,
                Err(err) => {
                    self.reporter
                        .transition_step(
                            &ctx.run.id,
                            &step.id,
                            RunStatus::Failed,
                            Some(RunConclusion::Failure),
                        )
                        .await?;
                    self.reporter
                        .record_step_result(
                            &ctx.run.id,
                            &step.id,
                            "",
                            &format!("condition evaluation failed: {err}"),
                            None,
                        )
                        .await?;
                    job_succeeding = false;
                    continue;
                }
            };

            if !should_run {
                self.reporter
                    .transition_step(
                        &ctx.run.id,
                        &step.id,
                        RunStatus::Completed,
                        Some(RunConclusion::Skipped),
                    )
                    .await?;
                continue;
            }

            self.reporter
                .transition_step(&ctx.run.id, &step.id, RunStatus::InProgress, None)
                .await?;

            let timeout = step.timeout_secs.map(Duration::from_secs);
            let result = run_command(&step.command, &env, timeout, &ctx.cancel).await;

            match result {
                Ok(out) => {
                    let conclusion = if out.success() {
                        RunConclusion::Success
                    } else {
                        RunConclusion::Failure
                    };
                    let status = if out.success() {
                        RunStatus::Completed
                    } else {
                        RunStatus::Failed
                    };
                    self.reporter
                        .transition_step(&ctx.run.id, &step.id, status, Some(conclusion))
                        .await?;
                    self.reporter
                        .record_step_result(
                            &ctx.run.id,
                            &step.id,
                            &redact_output(&out.stdout, &resolved),
                            &redact_output(&out.stderr, &resolved),
                            Some(out.exit_code),
                        )
                        .await?;
                    if !out.success() && !step.continue_on_error {
                        job_succeeding = false;
                    }
                }
                Err(StepError::Timeout(limit)) => {
                    self.reporter
                        .transition_step(
                            &ctx.run.id,
                            &step.id,
                            RunStatus::Failed,
                            Some(RunConclusion::TimedOut),
                        )
                        .await?;
                    self.reporter
                        .record_step_result(
                            &ctx.run.id,
                            &step.id,
                            "",
                            &format!("step timed out after {}s", limit.as_secs()),
                            None,
                        )
                        .await?;
                    if !step.continue_on_error {
                        job_succeeding = false;
                        timed_out = true;
                    }
                }
                Err(StepError::Interrupted) => {
                    self.reporter
                        .transition_step(
                            &ctx.run.id,
                            &step.id,
                            RunStatus::Cancelled,
                            Some(RunConclusion::Cancelled),
                        )
                        .await?;
                }
                Err(StepError::Spawn(err)) => {
                    self.reporter
                        .transition_step(
                            &ctx.run.id,
                            &step.id,
                            RunStatus::Failed,
                            Some(RunConclusion::Failure),
                        )
                        .await?;
                    self.reporter
                        .record_step_result(
                            &ctx.run.id,
                            &step.id,
                            "",
                            &format!("failed to spawn command: {err}"),
                            None,
                        )
                        .await?;
                    job_succeeding = false;
                }
            }
        }

        if ctx.cancel.is_cancelled() {
            return Ok(RunConclusion::Cancelled);
        }
        if timed_out {
            return Ok(RunConclusion::TimedOut);
        }
        Ok(if job_succeeding {
            RunConclusion::Success
        } else {
            RunConclusion::Failure
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
