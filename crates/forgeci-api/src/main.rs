//! Forge CI entry point.
//!
//! Binary name: `forgeci`
//!
//! Parses CLI arguments, initializes database and services, then dispatches
//! to the appropriate command handler or starts the schedule ticker daemon.

mod cli;
mod state;

use std::sync::Arc;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use forgeci_core::engine::schedule::{CronTicker, TickCallback};
use forgeci_core::repository::workflow::WorkflowRepository;
use forgeci_observe::pipeline_attrs;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The watch daemon uses the full observability stack; one-shot commands
    // get a plain fmt subscriber tuned by verbosity.
    if let Commands::Watch { otel } = &cli.command {
        forgeci_observe::tracing_setup::init_tracing(*otel)
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;
    } else {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "warn",
            1 => "info,forgeci=debug",
            _ => "trace",
        };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(false)
            .init();
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "forgeci", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Workflow { action } => cli::workflow::handle(action, &state, cli.json).await?,
        Commands::Run { action } => cli::run::handle(action, &state, cli.json).await?,
        Commands::Secret { action } => cli::secret::handle(action, &state, cli.json).await?,
        Commands::Artifact { action } => cli::artifact::handle(action, &state, cli.json).await?,
        Commands::Watch { .. } => watch(state).await?,
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    forgeci_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

/// Run the schedule ticker until interrupted: replay missed ticks, register
/// every scheduled workflow, then dispatch runs as cron fires.
async fn watch(state: AppState) -> anyhow::Result<()> {
    let workflows = state
        .repo
        .list_scheduled_workflows()
        .await
        .map_err(|e| anyhow::anyhow!("failed to list scheduled workflows: {e}"))?;

    // Replay ticks that fired while the daemon was down.
    let baselines: Vec<_> = workflows
        .iter()
        .filter_map(|w| {
            w.schedule_cron
                .as_ref()
                .map(|cron| (w.id, cron.clone(), w.last_run_at))
        })
        .collect();
    for (workflow_id, ticks) in CronTicker::missed_ticks(&baselines) {
        for fired_at in ticks {
            if let Err(e) = state.service.handle_schedule_tick(&workflow_id, fired_at).await {
                tracing::error!(%workflow_id, error = %e, "missed tick replay failed");
            }
        }
    }

    let ticker = CronTicker::new();
    ticker
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("ticker start failed: {e}"))?;

    let service = Arc::clone(&state.service);
    for workflow in &workflows {
        let Some(cron) = &workflow.schedule_cron else {
            continue;
        };
        let service = Arc::clone(&service);
        let callback: TickCallback = Arc::new(move |workflow_id, fired_at| {
            let service = Arc::clone(&service);
            Box::pin(async move {
                match service.handle_schedule_tick(&workflow_id, fired_at).await {
                    Ok(Some(run_id)) => tracing::info!(
                        { pipeline_attrs::CICD_PIPELINE_RUN_ID } = %run_id,
                        { pipeline_attrs::CICD_SYSTEM_COMPONENT } = "ticker",
                        "scheduled run started"
                    ),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(%workflow_id, error = %e, "schedule tick failed");
                    }
                }
            })
        });
        if let Err(e) = ticker.register(workflow.id, cron, callback).await {
            tracing::warn!(
                workflow_id = %workflow.id,
                schedule = cron,
                error = %e,
                "skipping workflow with invalid schedule"
            );
        }
    }

    println!(
        "  {} Watching {} scheduled workflow{} (Ctrl+C to stop)",
        console::style("@").bold(),
        ticker.registered_count().await,
        if workflows.len() == 1 { "" } else { "s" }
    );

    shutdown_signal().await;

    ticker
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("ticker stop failed: {e}"))?;
    println!("\n  Ticker stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
