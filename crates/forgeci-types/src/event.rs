use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ProjectId, UserId};
use crate::workflow::TriggerKind;

/// An external event delivered to the trigger evaluator.
///
/// One event can start zero or more runs: every enabled workflow of the
/// project that subscribes to the event's kind (and passes its filters)
/// gets one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub project_id: ProjectId,
    /// Kind-specific payload, stored verbatim on the materialized run.
    /// Push events carry a `branch` field consulted by branch filters.
    #[serde(default)]
    pub payload: Value,
    /// The user behind the event, when one exists. Required for manual
    /// dispatch, absent for schedule ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(kind: TriggerKind, project_id: ProjectId) -> Self {
        Self {
            kind,
            project_id,
            payload: Value::Null,
            actor_user_id: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_actor(mut self, user_id: UserId) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    /// The branch named by a push or pull_request payload, if any.
    pub fn branch(&self) -> Option<&str> {
        self.payload.get("branch").and_then(Value::as_str)
    }
}
