//! Secret management CLI commands: set, list, delete.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use dialoguer::Password;

use forgeci_core::repository::secret::SecretStore;
use forgeci_types::secret::{Redacted, SecretName, SecretScope};

use crate::cli::ScopeArgs;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Set a secret value (prompts when --value is omitted).
    Set {
        /// Secret name ([A-Z][A-Z0-9_]*).
        name: String,

        /// Value for scripts/automation; prefer the prompt interactively.
        #[arg(long)]
        value: Option<String>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List secrets with masked values.
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Delete a secret.
    #[command(alias = "rm")]
    Delete {
        /// Secret name.
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },
}

pub async fn handle(cmd: SecretCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        SecretCommand::Set { name, value, scope } => {
            handle_set(&name, value.as_deref(), &scope, state, json).await
        }
        SecretCommand::List { scope } => handle_list(&scope, state, json).await,
        SecretCommand::Delete { name, scope } => handle_delete(&name, &scope, state, json).await,
    }
}

fn resolve_scope(args: &ScopeArgs, state: &AppState) -> Result<SecretScope> {
    if args.org {
        let org_id = state
            .identity
            .org_id
            .context("no organization configured for this installation")?;
        Ok(SecretScope::Organization(org_id))
    } else {
        Ok(SecretScope::Project(state.identity.project_id))
    }
}

async fn handle_set(
    name: &str,
    value: Option<&str>,
    scope_args: &ScopeArgs,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let name = SecretName::new(name)?;
    let scope = resolve_scope(scope_args, state)?;

    let secret_value = match value {
        Some(v) => v.to_string(),
        None => Password::new()
            .with_prompt(format!("Enter value for {}", style(name.as_str()).bold()))
            .interact()?,
    };
    let redacted = Redacted::new(secret_value);

    state.secrets.set(&name, &redacted, &scope).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "set": true,
                "name": name.as_str(),
                "scope": scope.to_string(),
                "masked": redacted.masked(),
            })
        );
    } else {
        println!(
            "  {} Secret '{}' set in {} ({})",
            style("*").green().bold(),
            style(name.as_str()).bold(),
            scope,
            redacted.masked()
        );
    }

    Ok(())
}

async fn handle_list(scope_args: &ScopeArgs, state: &AppState, json: bool) -> Result<()> {
    let scope = resolve_scope(scope_args, state)?;
    let entries = state.secrets.list(&scope).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!(
            "  {} No secrets stored. Add one with: {}",
            style("i").blue().bold(),
            style("forgeci secret set DEPLOY_TOKEN").yellow()
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
            Cell::new("Scope"),
            Cell::new("Updated"),
            Cell::new("Last used"),
        ]);

    for entry in &entries {
        let last_used = entry
            .last_used_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        table.add_row(vec![
            Cell::new(entry.name.as_str()),
            Cell::new(entry.scope.to_string()),
            Cell::new(entry.updated_at.format("%Y-%m-%d").to_string()).fg(Color::DarkGrey),
            Cell::new(last_used).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_delete(
    name: &str,
    scope_args: &ScopeArgs,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let name = SecretName::new(name)?;
    let scope = resolve_scope(scope_args, state)?;
    let existed = state.secrets.delete(&name, &scope).await?;

    if json {
        println!("{}", serde_json::json!({"deleted": existed}));
    } else if existed {
        println!(
            "  {} Secret '{}' deleted from {}",
            style("*").green().bold(),
            name.as_str(),
            scope
        );
    } else {
        println!("  Secret '{}' not found in {}", name.as_str(), scope);
    }

    Ok(())
}
