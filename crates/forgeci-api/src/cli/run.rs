//! Run CLI subcommands: trigger, event, status, logs, cancel, list.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use forgeci_core::repository::workflow::WorkflowRepository;
use forgeci_types::event::TriggerEvent;
use forgeci_types::ids::RunId;
use forgeci_types::run::{RunConclusion, RunStatus};
use forgeci_types::workflow::TriggerKind;

use crate::cli::workflow::parse_workflow_id;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum RunCommand {
    /// Trigger a workflow run manually.
    Trigger {
        /// Workflow UUID.
        workflow_id: String,

        /// Optional JSON inputs for the run.
        #[arg(long)]
        inputs: Option<String>,
    },

    /// Deliver an external event (push, pull-request, issue, release).
    Event {
        /// Event kind.
        #[arg(value_parser = ["push", "pull-request", "issue", "release"])]
        kind: String,

        /// Branch the event concerns (consulted by branch filters).
        #[arg(long)]
        branch: Option<String>,

        /// Optional JSON payload merged with the branch field.
        #[arg(long)]
        payload: Option<String>,
    },

    /// Show the full status tree (jobs and steps) of a run.
    Status {
        /// Run UUID.
        run_id: String,
    },

    /// Show captured step output for a run.
    Logs {
        /// Run UUID.
        run_id: String,
    },

    /// Cancel a run in flight.
    Cancel {
        /// Run UUID.
        run_id: String,
    },

    /// List recent runs for a workflow.
    #[command(alias = "ls")]
    List {
        /// Workflow UUID.
        workflow_id: String,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

pub async fn handle(cmd: RunCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        RunCommand::Trigger { workflow_id, inputs } => {
            handle_trigger(&workflow_id, inputs.as_deref(), state, json).await
        }
        RunCommand::Event {
            kind,
            branch,
            payload,
        } => handle_event(&kind, branch.as_deref(), payload.as_deref(), state, json).await,
        RunCommand::Status { run_id } => handle_status(&run_id, state, json).await,
        RunCommand::Logs { run_id } => handle_logs(&run_id, state, json).await,
        RunCommand::Cancel { run_id } => handle_cancel(&run_id, state, json).await,
        RunCommand::List { workflow_id, limit } => {
            handle_list(&workflow_id, limit, state, json).await
        }
    }
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    let uuid = raw
        .parse::<uuid::Uuid>()
        .with_context(|| format!("'{raw}' is not a valid run UUID"))?;
    Ok(RunId::from(uuid))
}

fn conclusion_cell(conclusion: Option<&RunConclusion>) -> Cell {
    match conclusion {
        Some(RunConclusion::Success) => Cell::new("success").fg(Color::Green),
        Some(RunConclusion::Failure) => Cell::new("failure").fg(Color::Red),
        Some(RunConclusion::TimedOut) => Cell::new("timed_out").fg(Color::Red),
        Some(RunConclusion::Cancelled) => Cell::new("cancelled").fg(Color::Yellow),
        Some(RunConclusion::Skipped) => Cell::new("skipped").fg(Color::DarkGrey),
        None => Cell::new("-").fg(Color::DarkGrey),
    }
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "queued",
        RunStatus::InProgress => "in_progress",
        RunStatus::Completed => "completed",
        RunStatus::Cancelled => "cancelled",
        RunStatus::Failed => "failed",
    }
}

// ---------------------------------------------------------------------------
// Trigger / event intake
// ---------------------------------------------------------------------------

async fn handle_trigger(
    workflow_id: &str,
    inputs_str: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let id = parse_workflow_id(workflow_id)?;
    let inputs = match inputs_str {
        Some(raw) => serde_json::from_str(raw).context("invalid JSON inputs")?,
        None => serde_json::Value::Null,
    };

    let run_id = state
        .service
        .dispatch_manual(&id, &state.identity.user_id, inputs)
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"run_id": run_id.to_string(), "status": "queued"})
        );
    } else {
        println!();
        println!("  {} Run queued", style("*").green().bold());
        println!("  Run ID: {run_id}");
        println!(
            "  Check progress: {}",
            style(format!("forgeci run status {run_id}")).dim()
        );
        println!();
    }

    Ok(())
}

async fn handle_event(
    kind: &str,
    branch: Option<&str>,
    payload_str: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let kind = match kind {
        "push" => TriggerKind::Push,
        "pull-request" => TriggerKind::PullRequest,
        "issue" => TriggerKind::Issue,
        "release" => TriggerKind::Release,
        other => anyhow::bail!("unsupported event kind '{other}'"),
    };

    let mut payload = match payload_str {
        Some(raw) => serde_json::from_str(raw).context("invalid JSON payload")?,
        None => serde_json::json!({}),
    };
    if let Some(branch) = branch
        && let Some(map) = payload.as_object_mut()
    {
        map.insert("branch".to_string(), serde_json::json!(branch));
    }

    let event = TriggerEvent::new(kind, state.identity.project_id)
        .with_payload(payload)
        .with_actor(state.identity.user_id);
    let run_ids = state.service.handle_event(&event).await?;

    if json {
        let out: Vec<_> = run_ids.iter().map(|r| r.to_string()).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        if run_ids.is_empty() {
            println!("  No workflows matched the event.");
        } else {
            println!(
                "  {} {} run{} started",
                style("*").green().bold(),
                run_ids.len(),
                if run_ids.len() == 1 { "" } else { "s" }
            );
            for run_id in &run_ids {
                println!("  {run_id}");
            }
        }
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Status / logs
// ---------------------------------------------------------------------------

async fn handle_status(run_id: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_run_id(run_id)?;
    let view = state.service.run_status(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!();
    println!(
        "  Run #{} ({}) -- {}",
        style(view.run_number).bold(),
        view.trigger_event,
        status_str(view.status)
    );
    if let Some(d) = view.duration_seconds {
        println!("  Duration: {d:.1}s");
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Job").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Conclusion"),
            Cell::new("Duration"),
        ]);

    for job in &view.jobs {
        let duration = job
            .duration_seconds
            .map(|d| format!("{d:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&job.job_id),
            Cell::new(status_str(job.status)),
            conclusion_cell(job.conclusion.as_ref()),
            Cell::new(duration),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_logs(run_id: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_run_id(run_id)?;
    let jobs = state
        .repo
        .list_jobs(&id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list jobs: {e}"))?;
    if jobs.is_empty() {
        anyhow::bail!("no jobs found for run {run_id}");
    }

    let mut out = Vec::new();
    for job in &jobs {
        let steps = state
            .repo
            .list_steps(&job.id)
            .await
            .map_err(|e| anyhow::anyhow!("failed to list steps: {e}"))?;
        out.push((job, steps));
    }

    if json {
        let rendered: Vec<_> = out
            .iter()
            .map(|(job, steps)| {
                serde_json::json!({
                    "job_id": job.job_id,
                    "steps": steps.iter().map(|s| serde_json::json!({
                        "step_number": s.step_number,
                        "name": s.name,
                        "exit_code": s.exit_code,
                        "output": s.output,
                        "error_output": s.error_output,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    for (job, steps) in &out {
        println!();
        println!("  {} {}", style("job").bold(), style(&job.job_id).cyan());
        for step in steps {
            println!(
                "    [{}] {} (exit {})",
                step.step_number,
                step.name,
                step.exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            if let Some(output) = &step.output
                && !output.is_empty()
            {
                for line in output.lines() {
                    println!("      {line}");
                }
            }
            if let Some(err) = &step.error_output
                && !err.is_empty()
            {
                for line in err.lines() {
                    println!("      {}", style(line).red());
                }
            }
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel / list
// ---------------------------------------------------------------------------

async fn handle_cancel(run_id: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_run_id(run_id)?;
    let cancelled = state.service.cancel_run(&id).await?;

    if json {
        println!("{}", serde_json::json!({"cancelled": cancelled}));
    } else if cancelled {
        println!("  {} Run {} cancelled", style("*").yellow().bold(), run_id);
    } else {
        println!("  Run {run_id} already finished; nothing to cancel.");
    }

    Ok(())
}

async fn handle_list(workflow_id: &str, limit: u32, state: &AppState, json: bool) -> Result<()> {
    let id = parse_workflow_id(workflow_id)?;
    let runs = state
        .repo
        .list_runs(&id, limit)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list runs: {e}"))?;

    if json {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "run_id": r.id.to_string(),
                    "run_number": r.run_number,
                    "trigger": r.trigger_event,
                    "status": r.status,
                    "conclusion": r.conclusion,
                    "created_at": r.created_at.to_rfc3339(),
                    "duration_seconds": r.duration_seconds,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No runs for this workflow yet.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Run ID"),
            Cell::new("Trigger"),
            Cell::new("Status"),
            Cell::new("Conclusion"),
            Cell::new("Created"),
        ]);

    for r in &runs {
        table.add_row(vec![
            Cell::new(r.run_number),
            Cell::new(r.id.to_string()).fg(Color::DarkGrey),
            Cell::new(r.trigger_event.to_string()),
            Cell::new(status_str(r.status)),
            conclusion_cell(r.conclusion.as_ref()),
            Cell::new(r.created_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}
