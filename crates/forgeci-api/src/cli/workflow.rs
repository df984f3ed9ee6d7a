//! Workflow definition CLI subcommands: create, list, delete.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use forgeci_core::repository::workflow::WorkflowRepository;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Register a workflow from a YAML file.
    Create {
        /// Workflow name (unique within the project).
        name: String,

        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Validate a workflow file and print its execution plan.
    Plan {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// List the project's enabled workflows.
    #[command(alias = "ls")]
    List,

    /// Delete a workflow and its run history.
    #[command(alias = "rm")]
    Delete {
        /// Workflow UUID.
        workflow_id: String,
    },
}

pub async fn handle(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Create { name, file } => handle_create(&name, &file, state, json).await,
        WorkflowCommand::Plan { file } => handle_plan(&file, json).await,
        WorkflowCommand::List => handle_list(state, json).await,
        WorkflowCommand::Delete { workflow_id } => {
            handle_delete(&workflow_id, state, json).await
        }
    }
}

async fn handle_create(name: &str, file: &PathBuf, state: &AppState, json: bool) -> Result<()> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;

    let workflow = state
        .service
        .save_workflow(
            state.identity.project_id,
            &state.identity.user_id,
            name,
            &yaml,
        )
        .await?;

    if json {
        let out = serde_json::json!({
            "id": workflow.id.to_string(),
            "name": workflow.name,
            "triggers": workflow.trigger_events,
            "schedule": workflow.schedule_cron,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Created workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.id);
        println!("  Triggers: {}", workflow.trigger_events.len());
        if let Some(cron) = &workflow.schedule_cron {
            println!("  Schedule: {cron}");
        }
        println!();
    }

    Ok(())
}

async fn handle_plan(file: &PathBuf, json: bool) -> Result<()> {
    let yaml = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let spec = forgeci_core::engine::parser::parse(&yaml)?;
    let order = forgeci_core::engine::dag::topological_order(&spec.jobs);

    if json {
        let out = serde_json::json!({
            "triggers": spec.trigger_kinds(),
            "schedule": spec.schedule_cron(),
            "order": order,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} Definition is valid", style("*").green().bold());
    println!(
        "  Triggers: {}",
        spec.trigger_kinds()
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Execution order (dependencies first):");
    for job_id in &order {
        let job = &spec.jobs[job_id];
        let cells = job.matrix_cells().len();
        let suffix = if cells > 1 {
            format!(" ({cells} matrix cells)")
        } else {
            String::new()
        };
        let needs = if job.depends_on.is_empty() {
            String::new()
        } else {
            format!("  needs: {}", job.depends_on.join(", "))
        };
        println!(
            "    {} {}{suffix}{}",
            style("->").dim(),
            style(job_id).cyan(),
            style(needs).dim()
        );
    }
    println!();

    Ok(())
}

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let workflows = state
        .repo
        .list_enabled_workflows(&state.identity.project_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list workflows: {e}"))?;

    if json {
        let out: Vec<_> = workflows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "id": w.id.to_string(),
                    "name": w.name,
                    "triggers": w.trigger_events,
                    "schedule": w.schedule_cron,
                    "total_runs": w.total_runs,
                    "successful_runs": w.successful_runs,
                    "failed_runs": w.failed_runs,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!(
            "  Create one with: {}",
            style("forgeci workflow create <name> <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("ID"),
            Cell::new("Runs"),
            Cell::new("Pass"),
            Cell::new("Fail"),
            Cell::new("Last"),
        ]);

    for w in &workflows {
        let last = match &w.last_run_status {
            Some(c) => serde_json::to_value(c)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "-".to_string()),
            None => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&w.name),
            Cell::new(w.id.to_string()).fg(Color::DarkGrey),
            Cell::new(w.total_runs),
            Cell::new(w.successful_runs).fg(Color::Green),
            Cell::new(w.failed_runs).fg(Color::Red),
            Cell::new(last),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_delete(workflow_id: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_workflow_id(workflow_id)?;
    state
        .service
        .delete_workflow(&id, &state.identity.user_id)
        .await?;

    if json {
        println!("{}", serde_json::json!({"deleted": true, "id": workflow_id}));
    } else {
        println!(
            "  {} Deleted workflow {}",
            style("*").green().bold(),
            workflow_id
        );
    }

    Ok(())
}

pub fn parse_workflow_id(raw: &str) -> Result<forgeci_types::ids::WorkflowId> {
    let uuid = raw
        .parse::<uuid::Uuid>()
        .with_context(|| format!("'{raw}' is not a valid workflow UUID"))?;
    Ok(forgeci_types::ids::WorkflowId::from(uuid))
}
