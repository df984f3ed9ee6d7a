//! Artifact store keeping bytes on disk under a root directory and metadata
//! in the `workflow_artifacts` table.
//!
//! Layout on disk is `<root>/<run_id>/<name>`. Expiry is enforced on read and
//! reclaimed by `purge_expired`, which the caller runs on a timer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use forgeci_core::repository::artifact::{ArtifactError, ArtifactStore};
use forgeci_types::ids::RunId;
use forgeci_types::run::WorkflowArtifact;
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::sqlite::pool::DatabasePool;

pub struct FsArtifactStore {
    pool: DatabasePool,
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(pool: DatabasePool, root: impl Into<PathBuf>) -> Self {
        Self { pool, root: root.into() }
    }

    fn artifact_path(&self, run_id: &RunId, name: &str) -> PathBuf {
        self.root.join(run_id.to_string()).join(name)
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ArtifactError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ArtifactError::Storage(format!("invalid datetime: {e}")))
}

fn artifact_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowArtifact, ArtifactError> {
    let get = |col: &str| -> Result<String, ArtifactError> {
        row.try_get::<String, _>(col)
            .map_err(|e| ArtifactError::Storage(e.to_string()))
    };

    let id = get("id")?
        .parse::<Uuid>()
        .map_err(|e| ArtifactError::Storage(format!("invalid UUID: {e}")))?;
    let run_id = get("run_id")?
        .parse::<Uuid>()
        .map_err(|e| ArtifactError::Storage(format!("invalid UUID: {e}")))?;

    Ok(WorkflowArtifact {
        id,
        run_id: RunId::from(run_id),
        name: get("name")?,
        file_path: get("file_path")?,
        file_size: row
            .try_get::<i64, _>("file_size")
            .map_err(|e| ArtifactError::Storage(e.to_string()))? as u64,
        checksum: get("checksum")?,
        expires_at: parse_datetime(&get("expires_at")?)?,
        created_at: parse_datetime(&get("created_at")?)?,
    })
}

const ARTIFACT_COLS: &str = "id, run_id, name, file_path, file_size, checksum, expires_at, created_at";

impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        run_id: &RunId,
        name: &str,
        bytes: &[u8],
        ttl: chrono::Duration,
    ) -> Result<WorkflowArtifact, ArtifactError> {
        let path = self.artifact_path(run_id, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let checksum = hex::encode(Sha256::digest(bytes));
        let now = Utc::now();
        let artifact = WorkflowArtifact {
            id: Uuid::now_v7(),
            run_id: *run_id,
            name: name.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            file_size: bytes.len() as u64,
            checksum,
            expires_at: now + ttl,
            created_at: now,
        };

        sqlx::query(
            r#"INSERT INTO workflow_artifacts
               (id, run_id, name, file_path, file_size, checksum, expires_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, name) DO UPDATE SET
                 file_path = excluded.file_path,
                 file_size = excluded.file_size,
                 checksum = excluded.checksum,
                 expires_at = excluded.expires_at"#,
        )
        .bind(artifact.id.to_string())
        .bind(artifact.run_id.to_string())
        .bind(&artifact.name)
        .bind(&artifact.file_path)
        .bind(artifact.file_size as i64)
        .bind(&artifact.checksum)
        .bind(artifact.expires_at.to_rfc3339())
        .bind(artifact.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| ArtifactError::Storage(e.to_string()))?;

        debug!(run_id = %run_id, name, size = artifact.file_size, "stored artifact");
        Ok(artifact)
    }

    async fn get(&self, run_id: &RunId, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let row = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLS} FROM workflow_artifacts WHERE run_id = ? AND name = ?"
        ))
        .bind(run_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| ArtifactError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Err(ArtifactError::NotFound(name.to_string()));
        };
        let artifact = artifact_from_row(&row)?;
        if artifact.is_expired(Utc::now()) {
            return Err(ArtifactError::Expired(name.to_string()));
        }

        Ok(tokio::fs::read(&artifact.file_path).await?)
    }

    async fn list(&self, run_id: &RunId) -> Result<Vec<WorkflowArtifact>, ArtifactError> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLS} FROM workflow_artifacts WHERE run_id = ? ORDER BY name ASC"
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| ArtifactError::Storage(e.to_string()))?;
        rows.iter().map(artifact_from_row).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ArtifactError> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLS} FROM workflow_artifacts WHERE expires_at < ?"
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| ArtifactError::Storage(e.to_string()))?;

        let mut purged = 0u64;
        for row in &rows {
            let artifact = artifact_from_row(row)?;
            // Missing file is fine, the row is the source of truth.
            if let Err(e) = tokio::fs::remove_file(&artifact.file_path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                return Err(e.into());
            }
            sqlx::query("DELETE FROM workflow_artifacts WHERE id = ?")
                .bind(artifact.id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(|e| ArtifactError::Storage(e.to_string()))?;
            purged += 1;
        }

        if purged > 0 {
            debug!(purged, "reaped expired artifacts");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::workflow::SqliteWorkflowRepository;
    use chrono::Duration;
    use forgeci_core::repository::workflow::WorkflowRepository;
    use forgeci_types::ids::ProjectId;
    use forgeci_types::run::{RunStatus, WorkflowRun};
    use forgeci_types::workflow::{TriggerKind, Workflow};
    use serde_json::json;

    /// `workflow_artifacts.run_id` references `workflow_runs`, so the fixture
    /// seeds a workflow and run row and hands back the run's id.
    async fn store(dir: &tempfile::TempDir) -> (FsArtifactStore, RunId) {
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();

        let repo = SqliteWorkflowRepository::new(pool.clone());
        let wf = Workflow::new(
            ProjectId::new(),
            "ci",
            "on: [push]\njobs:\n  build:\n    steps:\n      - run: \"true\"\n",
            vec![TriggerKind::Push],
            None,
        );
        repo.save_workflow(&wf).await.unwrap();
        let run = WorkflowRun {
            id: RunId::new(),
            workflow_id: wf.id,
            run_number: 0,
            trigger_event: TriggerKind::Push,
            trigger_user: None,
            trigger_data: json!({}),
            status: RunStatus::Queued,
            conclusion: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        };
        repo.create_run_graph(&run, &[], &[]).await.unwrap();

        (FsArtifactStore::new(pool, dir.path().join("artifacts")), run.id)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (store, run_id) = store(&dir).await;

        let artifact = store
            .put(&run_id, "build.log", b"compile ok\n", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(artifact.file_size, 11);
        assert_eq!(artifact.checksum.len(), 64);

        let bytes = store.get(&run_id, "build.log").await.unwrap();
        assert_eq!(bytes, b"compile ok\n");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store(&dir).await;

        let err = store.get(&RunId::new(), "nope").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (store, run_id) = store(&dir).await;

        store
            .put(&run_id, "stale", b"old", Duration::seconds(-1))
            .await
            .unwrap();

        let err = store.get(&run_id, "stale").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Expired(_)));
    }

    #[tokio::test]
    async fn test_put_replaces_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let (store, run_id) = store(&dir).await;

        store
            .put(&run_id, "out", b"first", Duration::hours(1))
            .await
            .unwrap();
        store
            .put(&run_id, "out", b"second", Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(store.get(&run_id, "out").await.unwrap(), b"second");
        assert_eq!(store.list(&run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_removes_rows_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let (store, run_id) = store(&dir).await;

        store
            .put(&run_id, "stale", b"old", Duration::seconds(-1))
            .await
            .unwrap();
        let fresh = store
            .put(&run_id, "fresh", b"new", Duration::hours(1))
            .await
            .unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);

        let listed = store.list(&run_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "fresh");
        assert!(std::path::Path::new(&fresh.file_path).exists());
    }
}
