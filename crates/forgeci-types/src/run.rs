//! Run, job, step, and artifact entities plus the status/conclusion
//! vocabulary shared by all three execution levels.
//!
//! `status` tracks lifecycle phase (queued / in_progress / terminal),
//! `conclusion` records the final outcome and is set exactly once, when the
//! entity reaches a terminal status. The state reporter is the only
//! component permitted to mutate these fields once persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{JobRowId, RunId, StepRowId, UserId, WorkflowId};
use crate::workflow::TriggerKind;

// ---------------------------------------------------------------------------
// Status / conclusion vocabulary
// ---------------------------------------------------------------------------

/// Lifecycle phase of a run, job, or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Final outcome of a run, job, or step. Set only alongside a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
}

impl std::fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::Skipped => "skipped",
            RunConclusion::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// One execution instance of a workflow, identified by
/// `(workflow_id, run_number)` with run_number monotonically increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    /// Monotonic, gap-free per workflow; allocated under a per-workflow
    /// serialization point at materialization time.
    pub run_number: u64,
    /// What kind of event produced this run.
    pub trigger_event: TriggerKind,
    /// The invoking user for manual triggers; None for automated ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_user: Option<UserId>,
    /// Event payload snapshot (branch, commit SHA, actor, ...).
    pub trigger_data: Value,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration, computed by the state reporter on termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// WorkflowJob
// ---------------------------------------------------------------------------

/// A unit of work within a run, composed of ordered steps.
///
/// `job_id` is the stable key from the YAML (suffixed per matrix cell),
/// unique within the run. A job may only leave `queued` once every entry in
/// `depends_on` has reached a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: JobRowId,
    pub run_id: RunId,
    /// Stable key from the YAML, unique within the run.
    pub job_id: String,
    /// Sibling `job_id`s this job waits on. Acyclicity is enforced at parse
    /// time, so a persisted run never contains a dependency cycle.
    pub depends_on: Vec<String>,
    /// When true, a failed dependency still counts as satisfied and this job
    /// runs instead of being skipped.
    pub tolerate_failed_dependencies: bool,
    /// Runner environment label from the YAML (`runs_on`).
    pub runs_on: String,
    /// The concrete matrix cell this job was expanded from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix_values: Option<Value>,
    /// Runner assignment, set at dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// A single command execution within a job, executed in strict
/// `step_number` order (1..N, contiguous, unique per job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepRowId,
    pub job_row_id: JobRowId,
    /// 1-based position within the job; execution order is total.
    pub step_number: u32,
    /// Display name (defaults to the command when absent in the YAML).
    pub name: String,
    /// Shell command to execute in the runner.
    pub command: String,
    /// Condition expression: `always()`, `success()` (default), `failure()`,
    /// or an expression over the run/job context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// A failing step with this flag set does not fail its job.
    pub continue_on_error: bool,
    /// Per-step timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Captured stdout (secret plaintext redacted before persistence).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Captured stderr, plus engine-level error descriptions (timeouts,
    /// missing secrets) so a UI can pinpoint the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// WorkflowArtifact
// ---------------------------------------------------------------------------

/// A named file output of a run, retained until `expires_at`.
///
/// Write-once; a background reaper deletes expired rows and backing bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowArtifact {
    pub id: uuid::Uuid,
    pub run_id: RunId,
    /// Unique per run.
    pub name: String,
    /// Backing file location managed by the artifact store.
    pub file_path: String,
    pub file_size: u64,
    /// SHA-256 of the stored bytes, hex-encoded.
    pub checksum: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowArtifact {
    /// Whether the artifact has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_terminality() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn status_and_conclusion_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&RunConclusion::TimedOut).unwrap(),
            "\"timed_out\""
        );
        let parsed: RunConclusion = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(parsed, RunConclusion::Skipped);
    }

    #[test]
    fn run_json_roundtrip() {
        let run = WorkflowRun {
            id: RunId::new(),
            workflow_id: WorkflowId::new(),
            run_number: 17,
            trigger_event: TriggerKind::Push,
            trigger_user: None,
            trigger_data: serde_json::json!({"branch": "main", "sha": "abc123"}),
            status: RunStatus::Queued,
            conclusion: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        };
        let json = serde_json::to_string(&run).unwrap();
        let parsed: WorkflowRun = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_number, 17);
        assert_eq!(parsed.trigger_event, TriggerKind::Push);
        assert_eq!(parsed.trigger_data["branch"], "main");
    }

    #[test]
    fn artifact_expiry() {
        let now = Utc::now();
        let artifact = WorkflowArtifact {
            id: uuid::Uuid::now_v7(),
            run_id: RunId::new(),
            name: "coverage.xml".to_string(),
            file_path: "/data/artifacts/x/coverage.xml".to_string(),
            file_size: 1024,
            checksum: "00".repeat(32),
            expires_at: now + Duration::days(7),
            created_at: now,
        };
        assert!(!artifact.is_expired(now));
        assert!(artifact.is_expired(now + Duration::days(8)));
    }
}
