//! Trigger evaluation: decides which workflows an event starts.
//!
//! Project-scoped events fan out to every enabled workflow that listens to
//! the event kind and passes its branch filters. Manual dispatch is gated on
//! edit permission. Schedule ticks arrive per workflow from the cron ticker
//! and are deduplicated so a missed-run sweep and a live tick inside the
//! same minute produce one run.
//!
//! A workflow whose YAML no longer parses is never a trigger-time error: it
//! is logged and skipped so one broken workflow cannot block a project's
//! other workflows.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use forgeci_types::error::RepositoryError;
use forgeci_types::event::TriggerEvent;
use forgeci_types::ids::WorkflowId;
use forgeci_types::spec::{TriggerFilter, WorkflowSpec};
use forgeci_types::workflow::{TriggerKind, Workflow};
use globset::{Glob, GlobSetBuilder};

use crate::engine::parser;
use crate::repository::project::PermissionService;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("manual dispatch requires an authenticated user")]
    MissingActor,

    #[error("user lacks permission to dispatch workflows in this project")]
    PermissionDenied,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Matches incoming events against the project's enabled workflows.
pub struct TriggerEvaluator<R: WorkflowRepository, P: PermissionService> {
    repo: Arc<R>,
    permissions: Arc<P>,
    /// Last accepted schedule tick per workflow, for dedupe.
    last_scheduled: DashMap<WorkflowId, DateTime<Utc>>,
}

impl<R: WorkflowRepository, P: PermissionService> TriggerEvaluator<R, P> {
    pub fn new(repo: Arc<R>, permissions: Arc<P>) -> Self {
        Self {
            repo,
            permissions,
            last_scheduled: DashMap::new(),
        }
    }

    /// Evaluate a project-scoped event. Returns the workflows to run, each
    /// with its parsed spec.
    pub async fn evaluate(
        &self,
        event: &TriggerEvent,
    ) -> Result<Vec<(Workflow, WorkflowSpec)>, TriggerError> {
        if event.kind == TriggerKind::Manual {
            let actor = event.actor_user_id.ok_or(TriggerError::MissingActor)?;
            if !self.permissions.can_edit(&actor, &event.project_id).await? {
                return Err(TriggerError::PermissionDenied);
            }
        }

        let workflows = self.repo.list_enabled_workflows(&event.project_id).await?;
        let mut matched = Vec::new();
        for workflow in workflows {
            if !workflow.listens_to(event.kind) {
                continue;
            }
            let Some(spec) = parse_or_skip(&workflow) else {
                continue;
            };
            if !branch_filter_passes(&spec, event) {
                tracing::debug!(
                    workflow_id = %workflow.id,
                    branch = event.branch().unwrap_or_default(),
                    "branch filter rejected event"
                );
                continue;
            }
            matched.push((workflow, spec));
        }
        Ok(matched)
    }

    /// Evaluate a schedule tick for one workflow. Returns `None` when the
    /// workflow no longer qualifies or the tick is a duplicate.
    pub async fn evaluate_schedule(
        &self,
        workflow_id: &WorkflowId,
        fired_at: DateTime<Utc>,
    ) -> Result<Option<(Workflow, WorkflowSpec)>, TriggerError> {
        let Some(workflow) = self.repo.get_workflow(workflow_id).await? else {
            return Ok(None);
        };
        if !workflow.enabled || !workflow.listens_to(TriggerKind::Schedule) {
            return Ok(None);
        }

        // Ticks within the same minute are the same cron occurrence.
        if let Some(last) = self.last_scheduled.get(workflow_id) {
            if fired_at - *last < Duration::seconds(60) {
                tracing::debug!(workflow_id = %workflow_id, "duplicate schedule tick ignored");
                return Ok(None);
            }
        }

        let Some(spec) = parse_or_skip(&workflow) else {
            return Ok(None);
        };
        self.last_scheduled.insert(*workflow_id, fired_at);
        Ok(Some((workflow, spec)))
    }
}

fn parse_or_skip(workflow: &Workflow) -> Option<WorkflowSpec> {
    match parser::parse(&workflow.yaml_content) {
        Ok(spec) => Some(spec),
        Err(err) => {
            tracing::warn!(
                workflow_id = %workflow.id,
                workflow = workflow.name.as_str(),
                error = %err,
                "skipping workflow with unparseable definition"
            );
            None
        }
    }
}

/// Push and pull_request triggers may restrict branches with glob patterns.
/// An event without a branch fails a branch-filtered workflow.
fn branch_filter_passes(spec: &WorkflowSpec, event: &TriggerEvent) -> bool {
    let Some(TriggerFilter {
        branches: Some(patterns),
        ..
    }) = spec.on.filter(event.kind)
    else {
        return true;
    };

    let Some(branch) = event.branch() else {
        return false;
    };

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => {
                tracing::warn!(pattern = pattern.as_str(), error = %err, "invalid branch glob");
            }
        }
    }
    match builder.build() {
        Ok(set) => set.is_match(branch),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
