//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by the CLI. Services
//! are generic over repository/executor traits, but AppState pins them to
//! the concrete infra implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use forgeci_core::engine::executor::ShellJobExecutor;
use forgeci_core::engine::reporter::StateReporter;
use forgeci_core::engine::scheduler::{RunScheduler, SchedulerConfig};
use forgeci_core::repository::memory::{StaticPermissionService, StaticProjectRepository};
use forgeci_core::service::dispatch::WorkflowService;
use forgeci_infra::artifact::FsArtifactStore;
use forgeci_infra::crypto::vault::VaultCrypto;
use forgeci_infra::sqlite::pool::DatabasePool;
use forgeci_infra::sqlite::secret::SqliteSecretStore;
use forgeci_infra::sqlite::workflow::SqliteWorkflowRepository;
use forgeci_types::ids::{OrgId, ProjectId, UserId};

/// Concrete type aliases for the service generics pinned to infra
/// implementations. The CLI is a single-user local coordinator, so project
/// and permission lookups are static.
pub type ConcreteExecutor = ShellJobExecutor<SqliteWorkflowRepository, SqliteSecretStore>;

pub type ConcreteWorkflowService = WorkflowService<
    SqliteWorkflowRepository,
    StaticPermissionService,
    StaticProjectRepository,
    ConcreteExecutor,
>;

/// Local installation identity, persisted on first run.
///
/// A standalone coordinator owns exactly one project; its UUID (and the
/// acting user's) must survive restarts so run history stays attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub project_id: ProjectId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
}

/// Shared application state holding all services.
pub struct AppState {
    pub service: Arc<ConcreteWorkflowService>,
    pub repo: Arc<SqliteWorkflowRepository>,
    pub secrets: Arc<SqliteSecretStore>,
    pub artifacts: FsArtifactStore,
    pub identity: LocalIdentity,
}

impl AppState {
    /// Initialize the application state: connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("forgeci.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        let identity = load_or_create_identity(&data_dir).await?;

        // The vault master key lives in a file (vault.key) so every CLI
        // invocation can decrypt secrets without prompting.
        let vault = load_or_create_vault(&data_dir).await?;

        let repo = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let secrets = Arc::new(SqliteSecretStore::new(db_pool.clone(), vault));
        let artifacts = FsArtifactStore::new(db_pool.clone(), data_dir.join("artifacts"));

        let branch = std::env::var("FORGECI_BRANCH").unwrap_or_else(|_| "main".to_string());
        let mut projects = StaticProjectRepository::new(branch);
        if let Some(org_id) = identity.org_id {
            projects = projects.with_org(org_id);
        }
        let permissions = Arc::new(StaticPermissionService::allow_all());

        let reporter = Arc::new(StateReporter::new(Arc::clone(&repo)));
        let executor = Arc::new(ShellJobExecutor::new(
            Arc::clone(&reporter),
            Arc::clone(&secrets),
        ));
        let scheduler = Arc::new(RunScheduler::new(
            Arc::clone(&reporter),
            executor,
            SchedulerConfig::default(),
        ));

        let service = Arc::new(WorkflowService::new(
            Arc::clone(&repo),
            Arc::new(projects),
            permissions,
            reporter,
            scheduler,
        ));

        Ok(Self {
            service,
            repo,
            secrets,
            artifacts,
            identity,
        })
    }
}

/// Data directory from `FORGECI_DATA_DIR`, falling back to `~/.forgeci`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FORGECI_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".forgeci")
}

async fn load_or_create_identity(data_dir: &Path) -> anyhow::Result<LocalIdentity> {
    let path = data_dir.join("identity.json");
    if let Ok(raw) = tokio::fs::read_to_string(&path).await {
        return serde_json::from_str(&raw)
            .with_context(|| format!("corrupt identity file at {}", path.display()));
    }

    let org_id = std::env::var("FORGECI_ORG_ID")
        .ok()
        .and_then(|s| s.parse::<uuid::Uuid>().ok())
        .map(OrgId::from);
    let identity = LocalIdentity {
        project_id: ProjectId::new(),
        user_id: UserId::new(),
        org_id,
    };
    tokio::fs::write(&path, serde_json::to_string_pretty(&identity)?).await?;
    Ok(identity)
}

async fn load_or_create_vault(data_dir: &Path) -> anyhow::Result<VaultCrypto> {
    let path = data_dir.join("vault.key");
    if let Ok(raw) = tokio::fs::read_to_string(&path).await {
        let bytes = hex::decode(raw.trim()).context("vault.key is not valid hex")?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("vault.key must be 32 bytes"))?;
        return Ok(VaultCrypto::new(&key));
    }

    let key = VaultCrypto::generate_key();
    tokio::fs::write(&path, hex::encode(key)).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&path, perms).await?;
    }
    Ok(VaultCrypto::new(&key))
}
