//! Workflow entity and trigger kinds.
//!
//! A `Workflow` is the persisted, user-authored definition: the raw YAML is
//! the source of truth, alongside denormalized trigger kinds (for fast event
//! matching) and lifetime run counters maintained by the state reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ProjectId, WorkflowId};
use crate::run::RunConclusion;

// ---------------------------------------------------------------------------
// TriggerKind
// ---------------------------------------------------------------------------

/// The kinds of external events that can start a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Manual,
    Schedule,
    Issue,
    Release,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Push => "push",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Manual => "manual",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Issue => "issue",
            TriggerKind::Release => "release",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A user-authored, reusable CI/CD definition scoped to a project.
///
/// `(project_id, name)` is unique. The YAML text is authoritative; callers
/// parse it into a `WorkflowSpec` per saved version. The lifetime counters
/// are mutated only by the state reporter when a run reaches a terminal
/// status. Deleting a workflow cascades to its runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on first save.
    pub id: WorkflowId,
    /// Owning project in the surrounding platform.
    pub project_id: ProjectId,
    /// Human-chosen name, unique within the project.
    pub name: String,
    /// Raw YAML definition (source of truth).
    pub yaml_content: String,
    /// Trigger kinds this workflow responds to (denormalized from the YAML
    /// for event matching without re-parsing).
    pub trigger_events: Vec<TriggerKind>,
    /// Disabled workflows never match trigger events.
    pub enabled: bool,
    /// Cron expression when the workflow has a schedule trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_cron: Option<String>,
    /// Lifetime number of runs materialized for this workflow.
    pub total_runs: u64,
    /// Lifetime number of runs that concluded success.
    pub successful_runs: u64,
    /// Lifetime number of runs that concluded failure.
    pub failed_runs: u64,
    /// Conclusion of the most recent terminal run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunConclusion>,
    /// When the most recent run was materialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Build a new, enabled workflow with zeroed counters.
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        yaml_content: impl Into<String>,
        trigger_events: Vec<TriggerKind>,
        schedule_cron: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            project_id,
            name: name.into(),
            yaml_content: yaml_content.into(),
            trigger_events,
            enabled: true,
            schedule_cron,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            last_run_status: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this workflow responds to the given trigger kind.
    pub fn listens_to(&self, kind: TriggerKind) -> bool {
        self.enabled && self.trigger_events.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
