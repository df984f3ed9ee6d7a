//! CLI command definitions and dispatch for the `forgeci` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a noun-verb
//! pattern (e.g., `forgeci workflow create`, `forgeci run trigger`).

pub mod artifact;
pub mod run;
pub mod secret;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run CI workflows on a local coordinator.
#[derive(Parser)]
#[command(name = "forgeci", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow definitions (create, list, delete).
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Manage workflow runs (trigger, event, status, cancel, list).
    Run {
        #[command(subcommand)]
        action: run::RunCommand,
    },

    /// Manage secrets (set, list, delete).
    Secret {
        #[command(subcommand)]
        action: secret::SecretCommand,
    },

    /// Manage run artifacts (list, save, purge).
    Artifact {
        #[command(subcommand)]
        action: artifact::ArtifactCommand,
    },

    /// Run the schedule ticker daemon for cron-triggered workflows.
    Watch {
        /// Bridge tracing spans to OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Shared option for secret commands: which scope to address.
#[derive(clap::Args)]
pub struct ScopeArgs {
    /// Address the organization scope instead of the local project.
    #[arg(long)]
    pub org: bool,
}

/// Shared argument for artifact save.
#[derive(clap::Args)]
pub struct OutputArgs {
    /// Destination path (defaults to the artifact name in the current dir).
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
