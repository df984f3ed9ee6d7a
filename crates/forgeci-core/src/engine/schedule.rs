//! Cron ticker for schedule-triggered workflows.
//!
//! Wraps `tokio-cron-scheduler` with a per-workflow registration lifecycle,
//! accepts both 5-field and 6-field cron expressions plus a few readable
//! shorthands, and detects ticks missed while the process was down so they
//! can be replayed through the trigger evaluator on startup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgeci_types::ids::WorkflowId;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TickerError {
    #[error("cron scheduler error: {0}")]
    Scheduler(String),

    #[error("invalid cron schedule: {0}")]
    InvalidSchedule(String),

    #[error("workflow {0} is not registered with the ticker")]
    NotRegistered(WorkflowId),
}

// ---------------------------------------------------------------------------
// Schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to the 6-field cron grammar the underlying
/// scheduler expects.
///
/// Accepted inputs:
/// - 6-field cron with seconds (passed through)
/// - 5-field cron (seconds field prepended)
/// - "every N seconds|minutes|hours"
/// - "every minute|hour|day", "minutely", "hourly", "daily"
/// - "every day at HH:MM"
pub fn normalize_cron(input: &str) -> Result<String, TickerError> {
    let trimmed = input.trim();
    match trimmed.split_whitespace().count() {
        6 => return Ok(trimmed.to_string()),
        5 => return Ok(format!("0 {trimmed}")),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(time) = rest.strip_prefix("day at ") {
            return daily_at(trimmed, time);
        }
        if let [count, unit] = rest.split_whitespace().collect::<Vec<_>>()[..] {
            let n: u32 = count
                .parse()
                .map_err(|_| TickerError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(TickerError::InvalidSchedule(
                    "interval must be greater than zero".to_string(),
                ));
            }
            return match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(TickerError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(TickerError::InvalidSchedule(format!(
        "unrecognized schedule: '{trimmed}'"
    )))
}

fn daily_at(original: &str, time: &str) -> Result<String, TickerError> {
    let invalid = || TickerError::InvalidSchedule(original.to_string());
    let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
    if hour >= 24 || minute >= 60 {
        return Err(invalid());
    }
    Ok(format!("0 {minute} {hour} * * *"))
}

// ---------------------------------------------------------------------------
// CronTicker
// ---------------------------------------------------------------------------

/// Callback invoked on each cron fire, feeding the trigger evaluator.
pub type TickCallback = Arc<
    dyn Fn(WorkflowId, DateTime<Utc>) -> futures_util::future::BoxFuture<'static, ()>
        + Send
        + Sync,
>;

struct Registration {
    /// Job id assigned by tokio-cron-scheduler.
    job_id: Uuid,
}

/// Drives schedule triggers for registered workflows.
pub struct CronTicker {
    inner: Arc<RwLock<Option<JobScheduler>>>,
    registrations: Arc<RwLock<HashMap<WorkflowId, Registration>>>,
}

impl CronTicker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            registrations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the underlying scheduler. Required before registration.
    pub async fn start(&self) -> Result<(), TickerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| TickerError::Scheduler(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| TickerError::Scheduler(e.to_string()))?;
        *self.inner.write().await = Some(scheduler);
        tracing::info!("cron ticker started");
        Ok(())
    }

    /// Shut down and drop all registrations.
    pub async fn stop(&self) -> Result<(), TickerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| TickerError::Scheduler(e.to_string()))?;
            tracing::info!("cron ticker stopped");
        }
        self.registrations.write().await.clear();
        Ok(())
    }

    /// Register a workflow's schedule. The callback fires on every tick.
    pub async fn register(
        &self,
        workflow_id: WorkflowId,
        schedule: &str,
        callback: TickCallback,
    ) -> Result<(), TickerError> {
        let cron_expr = normalize_cron(schedule)?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| TickerError::Scheduler("ticker not started".to_string()))?;

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let callback = callback.clone();
            Box::pin(async move {
                let now = Utc::now();
                tracing::debug!(%workflow_id, %now, "schedule tick");
                callback(workflow_id, now).await;
            })
        })
        .map_err(|e| TickerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| TickerError::Scheduler(e.to_string()))?;

        self.registrations
            .write()
            .await
            .insert(workflow_id, Registration { job_id });
        tracing::info!(%workflow_id, schedule = schedule, "workflow schedule registered");
        Ok(())
    }

    /// Remove a workflow's schedule.
    pub async fn unregister(&self, workflow_id: &WorkflowId) -> Result<(), TickerError> {
        let entry = self
            .registrations
            .write()
            .await
            .remove(workflow_id)
            .ok_or(TickerError::NotRegistered(*workflow_id))?;

        if let Some(scheduler) = self.inner.read().await.as_ref() {
            scheduler
                .remove(&entry.job_id)
                .await
                .map_err(|e| TickerError::Scheduler(e.to_string()))?;
        }
        tracing::info!(%workflow_id, "workflow schedule unregistered");
        Ok(())
    }

    pub async fn registered_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    /// Compute ticks each schedule would have produced between its last
    /// known fire and now. Used on startup to replay runs the process
    /// missed. Schedules without a baseline cannot lose ticks and are
    /// skipped, as are schedules that no longer parse.
    pub fn missed_ticks(
        schedules: &[(WorkflowId, String, Option<DateTime<Utc>>)],
    ) -> Vec<(WorkflowId, Vec<DateTime<Utc>>)> {
        let now = Utc::now();
        let mut missed = Vec::new();

        for (workflow_id, schedule, last_fired) in schedules {
            let Some(from) = last_fired else {
                continue;
            };
            let Ok(cron_expr) = normalize_cron(schedule) else {
                continue;
            };
            let Ok(cron) = cron_expr.parse::<croner::Cron>() else {
                continue;
            };

            let ticks: Vec<DateTime<Utc>> =
                cron.iter_after(*from).take_while(|next| *next < now).collect();
            if !ticks.is_empty() {
                tracing::warn!(%workflow_id, count = ticks.len(), "missed schedule ticks");
                missed.push((*workflow_id, ticks));
            }
        }
        missed
    }
}

impl Default for CronTicker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    // -------------------------------------------------------------------
    // normalize_cron
    // -------------------------------------------------------------------

    #[test]
    fn test_five_field_cron_gains_seconds() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_six_field_cron_passthrough() {
        assert_eq!(normalize_cron("30 */5 * * * *").unwrap(), "30 */5 * * * *");
    }

    #[test]
    fn test_readable_intervals() {
        assert_eq!(normalize_cron("every 5 minutes").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("every 10 seconds").unwrap(), "*/10 * * * * *");
        assert_eq!(normalize_cron("every 2 hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_cron("every 1 minute").unwrap(), "0 */1 * * * *");
    }

    #[test]
    fn test_readable_keywords() {
        assert_eq!(normalize_cron("every minute").unwrap(), "0 * * * * *");
        assert_eq!(normalize_cron("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_cron("daily").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize_cron("Every 5 Minutes").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_daily_at_time() {
        assert_eq!(normalize_cron("every day at 09:30").unwrap(), "0 30 9 * * *");
        assert_eq!(normalize_cron("every day at 00:00").unwrap(), "0 0 0 * * *");
        assert!(normalize_cron("every day at 25:00").is_err());
    }

    #[test]
    fn test_rejects_nonsense() {
        assert!(normalize_cron("run whenever").is_err());
        assert!(normalize_cron("every 0 minutes").is_err());
    }

    // -------------------------------------------------------------------
    // missed_ticks
    // -------------------------------------------------------------------

    #[test]
    fn test_missed_ticks_detects_gap() {
        let wf_id = WorkflowId::new();
        let last = Utc::now() - Duration::minutes(10);
        let schedules = vec![(wf_id, "every minute".to_string(), Some(last))];

        let missed = CronTicker::missed_ticks(&schedules);
        assert_eq!(missed.len(), 1);
        let count = missed[0].1.len();
        assert!((8..=10).contains(&count), "expected 8-10 ticks, got {count}");
    }

    #[test]
    fn test_missed_ticks_quiet_when_current() {
        let wf_id = WorkflowId::new();
        let last = Utc::now() - Duration::seconds(5);
        let schedules = vec![(wf_id, "every hour".to_string(), Some(last))];
        assert!(CronTicker::missed_ticks(&schedules).is_empty());
    }

    #[test]
    fn test_missed_ticks_needs_baseline() {
        let schedules = vec![(WorkflowId::new(), "every minute".to_string(), None)];
        assert!(CronTicker::missed_ticks(&schedules).is_empty());
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_register_and_unregister() {
        let ticker = CronTicker::new();
        ticker.start().await.unwrap();

        let wf_id = WorkflowId::new();
        let cb: TickCallback = Arc::new(|_id, _at| Box::pin(async {}));
        ticker.register(wf_id, "every 5 minutes", cb).await.unwrap();
        assert_eq!(ticker.registered_count().await, 1);

        ticker.unregister(&wf_id).await.unwrap();
        assert_eq!(ticker.registered_count().await, 0);

        ticker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_before_start_fails() {
        let ticker = CronTicker::new();
        let cb: TickCallback = Arc::new(|_id, _at| Box::pin(async {}));
        assert!(ticker.register(WorkflowId::new(), "every minute", cb).await.is_err());
    }

    #[tokio::test]
    async fn test_unregister_unknown_fails() {
        let ticker = CronTicker::new();
        ticker.start().await.unwrap();
        assert!(matches!(
            ticker.unregister(&WorkflowId::new()).await.unwrap_err(),
            TickerError::NotRegistered(_)
        ));
        ticker.stop().await.unwrap();
    }
}
