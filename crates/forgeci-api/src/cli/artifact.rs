//! Artifact CLI commands: list, save, purge.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use forgeci_core::repository::artifact::ArtifactStore;
use forgeci_types::ids::RunId;

use crate::cli::OutputArgs;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ArtifactCommand {
    /// List a run's artifacts.
    #[command(alias = "ls")]
    List {
        /// Run UUID.
        run_id: String,
    },

    /// Download an artifact to a local file.
    Save {
        /// Run UUID.
        run_id: String,

        /// Artifact name.
        name: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Delete all expired artifacts.
    Purge,
}

pub async fn handle(cmd: ArtifactCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ArtifactCommand::List { run_id } => handle_list(&run_id, state, json).await,
        ArtifactCommand::Save {
            run_id,
            name,
            output,
        } => handle_save(&run_id, &name, &output, state, json).await,
        ArtifactCommand::Purge => handle_purge(state, json).await,
    }
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    let uuid = raw
        .parse::<uuid::Uuid>()
        .with_context(|| format!("'{raw}' is not a valid run UUID"))?;
    Ok(RunId::from(uuid))
}

async fn handle_list(run_id: &str, state: &AppState, json: bool) -> Result<()> {
    let id = parse_run_id(run_id)?;
    let artifacts = state.artifacts.list(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!();
        println!("  No artifacts for this run.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Size"),
            Cell::new("Checksum"),
            Cell::new("Expires"),
        ]);

    for a in &artifacts {
        table.add_row(vec![
            Cell::new(&a.name),
            Cell::new(format!("{} B", a.file_size)),
            Cell::new(&a.checksum[..12.min(a.checksum.len())]).fg(Color::DarkGrey),
            Cell::new(a.expires_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_save(
    run_id: &str,
    name: &str,
    output: &OutputArgs,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let id = parse_run_id(run_id)?;
    let bytes = state.artifacts.get(&id, name).await?;

    let dest = output
        .output
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from(name));
    tokio::fs::write(&dest, &bytes)
        .await
        .with_context(|| format!("cannot write {}", dest.display()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({"saved": dest.display().to_string(), "bytes": bytes.len()})
        );
    } else {
        println!(
            "  {} Saved {} ({} bytes) to {}",
            style("*").green().bold(),
            name,
            bytes.len(),
            dest.display()
        );
    }

    Ok(())
}

async fn handle_purge(state: &AppState, json: bool) -> Result<()> {
    let purged = state.artifacts.purge_expired(chrono::Utc::now()).await?;

    if json {
        println!("{}", serde_json::json!({"purged": purged}));
    } else {
        println!(
            "  {} Purged {} expired artifact{}",
            style("*").green().bold(),
            purged,
            if purged == 1 { "" } else { "s" }
        );
    }

    Ok(())
}
