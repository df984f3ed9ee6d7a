//! Parsed workflow specification (the YAML-facing shape).
//!
//! `WorkflowSpec` is the immutable, validated form of a workflow's YAML,
//! consumed once at materialization time. Parsing and structural validation
//! live in `forgeci-core`; this module only defines the serde shape and a
//! few pure helpers (trigger kind listing, matrix cell expansion).
//!
//! ```yaml
//! on:
//!   push:
//!     branches: [main, "release/*"]
//!   schedule:
//!     cron: "0 9 * * *"
//! jobs:
//!   build:
//!     runs_on: linux
//!     needs: [lint]
//!     matrix:
//!       os: [linux, macos]
//!     steps:
//!       - name: Build
//!         run: cargo build
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::TriggerKind;

// ---------------------------------------------------------------------------
// WorkflowSpec
// ---------------------------------------------------------------------------

/// The immutable specification parsed from a workflow's YAML.
///
/// Jobs are kept in a `BTreeMap` so iteration order is ascending `job_id`,
/// which is also the scheduler's deterministic dispatch tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Trigger list: either a bare list of kinds or a map of kind to filter.
    pub on: TriggerSpec,
    /// Job graph keyed by `job_id`.
    pub jobs: BTreeMap<String, JobSpec>,
}

impl WorkflowSpec {
    /// The trigger kinds this spec subscribes to.
    pub fn trigger_kinds(&self) -> Vec<TriggerKind> {
        self.on.kinds()
    }

    /// The cron expression of the schedule trigger, if present.
    pub fn schedule_cron(&self) -> Option<&str> {
        self.on.filter(TriggerKind::Schedule).and_then(|f| f.cron.as_deref())
    }
}

// ---------------------------------------------------------------------------
// TriggerSpec
// ---------------------------------------------------------------------------

/// The `on:` block. YAML accepts both a list of kinds and a map with
/// per-kind filters; a map entry with no body (`manual:`) means no filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerSpec {
    Kinds(Vec<TriggerKind>),
    Filtered(BTreeMap<TriggerKind, Option<TriggerFilter>>),
}

impl TriggerSpec {
    /// All trigger kinds named by this block.
    pub fn kinds(&self) -> Vec<TriggerKind> {
        match self {
            TriggerSpec::Kinds(kinds) => kinds.clone(),
            TriggerSpec::Filtered(map) => map.keys().copied().collect(),
        }
    }

    /// The filter attached to a kind, if any.
    pub fn filter(&self, kind: TriggerKind) -> Option<&TriggerFilter> {
        match self {
            TriggerSpec::Kinds(_) => None,
            TriggerSpec::Filtered(map) => map.get(&kind).and_then(|f| f.as_ref()),
        }
    }
}

/// Optional constraints narrowing when a trigger kind fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerFilter {
    /// Glob patterns the event branch must match (push / pull_request).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<String>>,
    /// Cron expression (schedule).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

// ---------------------------------------------------------------------------
// JobSpec
// ---------------------------------------------------------------------------

/// One job in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Runner environment label.
    #[serde(default = "default_runs_on")]
    pub runs_on: String,
    /// Sibling job ids this job waits on (`needs` in the YAML).
    #[serde(default, rename = "needs")]
    pub depends_on: Vec<String>,
    /// When true, a failed dependency still counts as satisfied.
    #[serde(default)]
    pub tolerate_failed_dependencies: bool,
    /// Secret names injected into every step's environment.
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Fan-out axes: each key maps to the values it ranges over. One job is
    /// materialized per cell of the cartesian product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<BTreeMap<String, Vec<Value>>>,
    /// Ordered step list; must be non-empty.
    pub steps: Vec<StepSpec>,
}

fn default_runs_on() -> String {
    "default".to_string()
}

impl JobSpec {
    /// Expand the matrix into concrete cells (cartesian product, axes in
    /// key order). A job without a matrix yields one empty cell.
    pub fn matrix_cells(&self) -> Vec<BTreeMap<String, Value>> {
        let Some(matrix) = &self.matrix else {
            return vec![BTreeMap::new()];
        };
        let mut cells: Vec<BTreeMap<String, Value>> = vec![BTreeMap::new()];
        for (axis, values) in matrix {
            let mut next = Vec::with_capacity(cells.len() * values.len());
            for cell in &cells {
                for value in values {
                    let mut cell = cell.clone();
                    cell.insert(axis.clone(), value.clone());
                    next.push(cell);
                }
            }
            cells = next;
        }
        cells
    }
}

// ---------------------------------------------------------------------------
// StepSpec
// ---------------------------------------------------------------------------

/// One command within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Display name; defaults to the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Shell command line.
    pub run: String,
    /// Condition expression (`always()`, `success()`, `failure()`, or an
    /// expression over the run context). Absent means `success()`.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    /// Per-step timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl StepSpec {
    /// Display name for persistence and UI.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.run)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
