//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `forgeci-core` using sqlx with split
//! read/write pools. Run graphs are written in a single transaction on the
//! writer pool, which also serializes run-number allocation per workflow.

use chrono::{DateTime, Utc};
use forgeci_core::repository::workflow::WorkflowRepository;
use forgeci_types::error::RepositoryError;
use forgeci_types::ids::{JobRowId, ProjectId, RunId, StepRowId, UserId, WorkflowId};
use forgeci_types::run::{RunConclusion, RunStatus, WorkflowJob, WorkflowRun, WorkflowStep};
use forgeci_types::workflow::{TriggerKind, Workflow};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Serialize a unit enum to its snake_case serde name.
fn enum_to_str<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| RepositoryError::Query("non-string enum serialization".to_string()))
}

fn enum_from_str<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| RepositoryError::Query(format!("invalid enum value '{s}': {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(e.to_string())
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn workflow_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, RepositoryError> {
    let get = |col: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };
    let get_opt = |col: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get::<Option<String>, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };

    let trigger_events: Vec<TriggerKind> = from_json(&get("trigger_events")?)?;
    let last_run_status: Option<RunConclusion> = get_opt("last_run_status")?
        .as_deref()
        .map(enum_from_str)
        .transpose()?;

    Ok(Workflow {
        id: WorkflowId::from(parse_uuid(&get("id")?)?),
        project_id: ProjectId::from(parse_uuid(&get("project_id")?)?),
        name: get("name")?,
        yaml_content: get("yaml_content")?,
        trigger_events,
        enabled: row
            .try_get::<i64, _>("enabled")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            != 0,
        schedule_cron: get_opt("schedule_cron")?,
        total_runs: row
            .try_get::<i64, _>("total_runs")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u64,
        successful_runs: row
            .try_get::<i64, _>("successful_runs")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u64,
        failed_runs: row
            .try_get::<i64, _>("failed_runs")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u64,
        last_run_status,
        last_run_at: get_opt("last_run_at")?.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&get("created_at")?)?,
        updated_at: parse_datetime(&get("updated_at")?)?,
    })
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowRun, RepositoryError> {
    let get = |col: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };
    let get_opt = |col: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get::<Option<String>, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };

    Ok(WorkflowRun {
        id: RunId::from(parse_uuid(&get("id")?)?),
        workflow_id: WorkflowId::from(parse_uuid(&get("workflow_id")?)?),
        run_number: row
            .try_get::<i64, _>("run_number")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u64,
        trigger_event: enum_from_str(&get("trigger_event")?)?,
        trigger_user: get_opt("trigger_user")?
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(UserId::from),
        trigger_data: from_json(&get("trigger_data")?)?,
        status: enum_from_str(&get("status")?)?,
        conclusion: get_opt("conclusion")?.as_deref().map(enum_from_str).transpose()?,
        created_at: parse_datetime(&get("created_at")?)?,
        started_at: get_opt("started_at")?.as_deref().map(parse_datetime).transpose()?,
        completed_at: get_opt("completed_at")?.as_deref().map(parse_datetime).transpose()?,
        duration_seconds: row
            .try_get::<Option<f64>, _>("duration_seconds")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
    })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowJob, RepositoryError> {
    let get = |col: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };
    let get_opt = |col: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get::<Option<String>, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };

    Ok(WorkflowJob {
        id: JobRowId::from(parse_uuid(&get("id")?)?),
        run_id: RunId::from(parse_uuid(&get("run_id")?)?),
        job_id: get("job_id")?,
        depends_on: from_json(&get("depends_on")?)?,
        tolerate_failed_dependencies: row
            .try_get::<i64, _>("tolerate_failed_dependencies")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            != 0,
        runs_on: get("runs_on")?,
        matrix_values: get_opt("matrix_values")?.as_deref().map(from_json).transpose()?,
        runner_id: get_opt("runner_id")?,
        container_id: get_opt("container_id")?,
        status: enum_from_str(&get("status")?)?,
        conclusion: get_opt("conclusion")?.as_deref().map(enum_from_str).transpose()?,
        started_at: get_opt("started_at")?.as_deref().map(parse_datetime).transpose()?,
        completed_at: get_opt("completed_at")?.as_deref().map(parse_datetime).transpose()?,
        duration_seconds: row
            .try_get::<Option<f64>, _>("duration_seconds")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
    })
}

fn step_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowStep, RepositoryError> {
    let get = |col: &str| -> Result<String, RepositoryError> {
        row.try_get::<String, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };
    let get_opt = |col: &str| -> Result<Option<String>, RepositoryError> {
        row.try_get::<Option<String>, _>(col)
            .map_err(|e| RepositoryError::Query(e.to_string()))
    };

    Ok(WorkflowStep {
        id: StepRowId::from(parse_uuid(&get("id")?)?),
        job_row_id: JobRowId::from(parse_uuid(&get("job_row_id")?)?),
        step_number: row
            .try_get::<i64, _>("step_number")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u32,
        name: get("name")?,
        command: get("command")?,
        condition: get_opt("condition")?,
        continue_on_error: row
            .try_get::<i64, _>("continue_on_error")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            != 0,
        timeout_secs: row
            .try_get::<Option<i64>, _>("timeout_secs")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .map(|t| t as u64),
        output: get_opt("output")?,
        error_output: get_opt("error_output")?,
        exit_code: row
            .try_get::<Option<i64>, _>("exit_code")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .map(|c| c as i32),
        status: enum_from_str(&get("status")?)?,
        conclusion: get_opt("conclusion")?.as_deref().map(enum_from_str).transpose()?,
        started_at: get_opt("started_at")?.as_deref().map(parse_datetime).transpose()?,
        completed_at: get_opt("completed_at")?.as_deref().map(parse_datetime).transpose()?,
        duration_seconds: row
            .try_get::<Option<f64>, _>("duration_seconds")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
    })
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

const WORKFLOW_COLS: &str = "id, project_id, name, yaml_content, trigger_events, enabled, \
     schedule_cron, total_runs, successful_runs, failed_runs, last_run_status, last_run_at, \
     created_at, updated_at";

const RUN_COLS: &str = "id, workflow_id, run_number, trigger_event, trigger_user, trigger_data, \
     status, conclusion, created_at, started_at, completed_at, duration_seconds";

const JOB_COLS: &str = "id, run_id, job_id, depends_on, tolerate_failed_dependencies, runs_on, \
     matrix_values, runner_id, container_id, status, conclusion, started_at, completed_at, \
     duration_seconds";

const STEP_COLS: &str = "id, job_row_id, step_number, name, command, condition, \
     continue_on_error, timeout_secs, output, error_output, exit_code, status, conclusion, \
     started_at, completed_at, duration_seconds";

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflows
               (id, project_id, name, yaml_content, trigger_events, enabled, schedule_cron,
                total_runs, successful_runs, failed_runs, last_run_status, last_run_at,
                created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 yaml_content = excluded.yaml_content,
                 trigger_events = excluded.trigger_events,
                 enabled = excluded.enabled,
                 schedule_cron = excluded.schedule_cron,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.project_id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.yaml_content)
        .bind(to_json(&workflow.trigger_events)?)
        .bind(workflow.enabled as i64)
        .bind(&workflow.schedule_cron)
        .bind(workflow.total_runs as i64)
        .bind(workflow.successful_runs as i64)
        .bind(workflow.failed_runs as i64)
        .bind(
            workflow
                .last_run_status
                .as_ref()
                .map(enum_to_str)
                .transpose()?,
        )
        .bind(workflow.last_run_at.as_ref().map(format_datetime))
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {WORKFLOW_COLS} FROM workflows WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list_enabled_workflows(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLS} FROM workflows WHERE project_id = ? AND enabled = 1 ORDER BY name ASC"
        ))
        .bind(project_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn list_scheduled_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLS} FROM workflows WHERE enabled = 1 AND schedule_cron IS NOT NULL ORDER BY name ASC"
        ))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_run_outcome(
        &self,
        workflow_id: &WorkflowId,
        conclusion: RunConclusion,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let conclusion_str = enum_to_str(&conclusion)?;
        sqlx::query(
            r#"UPDATE workflows SET
                 total_runs = total_runs + 1,
                 successful_runs = successful_runs
                   + CASE WHEN ?1 = 'success' THEN 1 ELSE 0 END,
                 failed_runs = failed_runs
                   + CASE WHEN ?1 IN ('failure', 'timed_out') THEN 1 ELSE 0 END,
                 last_run_status = ?1,
                 last_run_at = ?2,
                 updated_at = ?2
               WHERE id = ?3"#,
        )
        .bind(&conclusion_str)
        .bind(format_datetime(&at))
        .bind(workflow_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn create_run_graph(
        &self,
        run: &WorkflowRun,
        jobs: &[WorkflowJob],
        steps: &[WorkflowStep],
    ) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let (run_number,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(run_number), 0) + 1 FROM workflow_runs WHERE workflow_id = ?",
        )
        .bind(run.workflow_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO workflow_runs
               (id, workflow_id, run_number, trigger_event, trigger_user, trigger_data,
                status, conclusion, created_at, started_at, completed_at, duration_seconds)
               VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, NULL, NULL, NULL)"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run_number)
        .bind(enum_to_str(&run.trigger_event)?)
        .bind(run.trigger_user.map(|u| u.to_string()))
        .bind(to_json(&run.trigger_data)?)
        .bind(enum_to_str(&run.status)?)
        .bind(format_datetime(&run.created_at))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        for job in jobs {
            sqlx::query(
                r#"INSERT INTO workflow_jobs
                   (id, run_id, job_id, depends_on, tolerate_failed_dependencies, runs_on,
                    matrix_values, runner_id, container_id, status, conclusion,
                    started_at, completed_at, duration_seconds)
                   VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, NULL, NULL, NULL, NULL)"#,
            )
            .bind(job.id.to_string())
            .bind(job.run_id.to_string())
            .bind(&job.job_id)
            .bind(to_json(&job.depends_on)?)
            .bind(job.tolerate_failed_dependencies as i64)
            .bind(&job.runs_on)
            .bind(job.matrix_values.as_ref().map(to_json).transpose()?)
            .bind(enum_to_str(&job.status)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        for step in steps {
            sqlx::query(
                r#"INSERT INTO workflow_steps
                   (id, job_row_id, step_number, name, command, condition, continue_on_error,
                    timeout_secs, output, error_output, exit_code, status, conclusion,
                    started_at, completed_at, duration_seconds)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, NULL, NULL, NULL, NULL)"#,
            )
            .bind(step.id.to_string())
            .bind(step.job_row_id.to_string())
            .bind(step.step_number as i64)
            .bind(&step.name)
            .bind(&step.command)
            .bind(&step.condition)
            .bind(step.continue_on_error as i64)
            .bind(step.timeout_secs.map(|t| t as i64))
            .bind(enum_to_str(&step.status)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(run_number as u64)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLS} FROM workflow_runs WHERE id = ?"))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs(
        &self,
        workflow_id: &WorkflowId,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLS} FROM workflow_runs WHERE workflow_id = ? ORDER BY run_number DESC LIMIT ?"
        ))
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(run_from_row).collect()
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
        sqlx::query(
            r#"UPDATE workflow_runs SET
                 status = ?,
                 conclusion = COALESCE(?, conclusion),
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, completed_at),
                 duration_seconds = COALESCE(?, duration_seconds)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(conclusion.as_ref().map(enum_to_str).transpose()?)
        .bind(started_at.as_ref().map(format_datetime))
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(duration_seconds)
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_job(&self, job_row_id: &JobRowId) -> Result<Option<WorkflowJob>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLS} FROM workflow_jobs WHERE id = ?"))
            .bind(job_row_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, run_id: &RunId) -> Result<Vec<WorkflowJob>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLS} FROM workflow_jobs WHERE run_id = ? ORDER BY job_id ASC"
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(job_from_row).collect()
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
        sqlx::query(
            r#"UPDATE workflow_jobs SET
                 status = ?,
                 conclusion = COALESCE(?, conclusion),
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, completed_at),
                 duration_seconds = COALESCE(?, duration_seconds)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(conclusion.as_ref().map(enum_to_str).transpose()?)
        .bind(started_at.as_ref().map(format_datetime))
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(duration_seconds)
        .bind(job_row_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn assign_runner(
        &self,
        job_row_id: &JobRowId,
        runner_id: &str,
        container_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE workflow_jobs SET runner_id = ?, container_id = ? WHERE id = ?")
            .bind(runner_id)
            .bind(container_id)
            .bind(job_row_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_step(
        &self,
        step_row_id: &StepRowId,
    ) -> Result<Option<WorkflowStep>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {STEP_COLS} FROM workflow_steps WHERE id = ?"))
            .bind(step_row_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(step_from_row).transpose()
    }

    async fn list_steps(
        &self,
        job_row_id: &JobRowId,
    ) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLS} FROM workflow_steps WHERE job_row_id = ? ORDER BY step_number ASC"
        ))
        .bind(job_row_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(step_from_row).collect()
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
        sqlx::query(
            r#"UPDATE workflow_steps SET
                 status = ?,
                 conclusion = COALESCE(?, conclusion),
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, completed_at),
                 duration_seconds = COALESCE(?, duration_seconds)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(conclusion.as_ref().map(enum_to_str).transpose()?)
        .bind(started_at.as_ref().map(format_datetime))
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(duration_seconds)
        .bind(step_row_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn record_step_result(
        &self,
        step_row_id: &StepRowId,
        output: &str,
        error_output: &str,
        exit_code: Option<i32>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE workflow_steps SET output = ?, error_output = ?, exit_code = ? WHERE id = ?",
        )
        .bind(output)
        .bind(error_output)
        .bind(exit_code.map(|c| c as i64))
        .bind(step_row_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
