//! SQLite-backed secret store with AES-256-GCM encryption at rest.

use chrono::{DateTime, Utc};
use forgeci_core::repository::secret::SecretStore;
use forgeci_types::error::SecretError;
use forgeci_types::ids::{OrgId, ProjectId};
use forgeci_types::secret::{Redacted, SecretName, SecretScope, WorkflowSecret};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use crate::crypto::vault::VaultCrypto;

/// Secret store backed by SQLite. Values are encrypted with [`VaultCrypto`]
/// before hitting disk; only `Redacted` wrappers cross the API boundary.
pub struct SqliteSecretStore {
    pool: DatabasePool,
    vault: VaultCrypto,
}

impl SqliteSecretStore {
    pub fn new(pool: DatabasePool, vault: VaultCrypto) -> Self {
        Self { pool, vault }
    }
}

fn parse_scope(s: &str) -> Result<SecretScope, SecretError> {
    let (kind, id) = s
        .split_once(':')
        .ok_or_else(|| SecretError::StorageError(format!("malformed scope '{s}'")))?;
    let uuid = id
        .parse::<Uuid>()
        .map_err(|e| SecretError::StorageError(format!("malformed scope '{s}': {e}")))?;
    match kind {
        "project" => Ok(SecretScope::Project(ProjectId::from(uuid))),
        "org" => Ok(SecretScope::Organization(OrgId::from(uuid))),
        _ => Err(SecretError::StorageError(format!("unknown scope kind '{kind}'"))),
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SecretError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SecretError::StorageError(format!("invalid datetime: {e}")))
}

impl SecretStore for SqliteSecretStore {
    async fn get(
        &self,
        name: &SecretName,
        scope: &SecretScope,
    ) -> Result<Option<Redacted>, SecretError> {
        let row = sqlx::query("SELECT encrypted_value FROM secrets WHERE name = ? AND scope = ?")
            .bind(name.as_str())
            .bind(scope.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| SecretError::StorageError(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let blob: Vec<u8> = row
            .try_get("encrypted_value")
            .map_err(|e| SecretError::StorageError(e.to_string()))?;
        let plaintext = self
            .vault
            .decrypt(&blob)
            .map_err(|_| SecretError::EncryptionError)?;
        let value = String::from_utf8(plaintext).map_err(|_| SecretError::EncryptionError)?;
        Ok(Some(Redacted::new(value)))
    }

    async fn set(
        &self,
        name: &SecretName,
        value: &Redacted,
        scope: &SecretScope,
    ) -> Result<(), SecretError> {
        let encrypted = self
            .vault
            .encrypt(value.expose().as_bytes())
            .map_err(|_| SecretError::EncryptionError)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO secrets (name, scope, encrypted_value, created_at, updated_at, last_used_at)
               VALUES (?, ?, ?, ?, ?, NULL)
               ON CONFLICT(name, scope) DO UPDATE SET
                 encrypted_value = excluded.encrypted_value,
                 updated_at = excluded.updated_at"#,
        )
        .bind(name.as_str())
        .bind(scope.to_string())
        .bind(encrypted)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| SecretError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, name: &SecretName, scope: &SecretScope) -> Result<bool, SecretError> {
        let result = sqlx::query("DELETE FROM secrets WHERE name = ? AND scope = ?")
            .bind(name.as_str())
            .bind(scope.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| SecretError::StorageError(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, scope: &SecretScope) -> Result<Vec<WorkflowSecret>, SecretError> {
        let rows = sqlx::query(
            "SELECT name, scope, created_at, updated_at, last_used_at
             FROM secrets WHERE scope = ? ORDER BY name ASC",
        )
        .bind(scope.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| SecretError::StorageError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get("name")
                    .map_err(|e| SecretError::StorageError(e.to_string()))?;
                let scope: String = row
                    .try_get("scope")
                    .map_err(|e| SecretError::StorageError(e.to_string()))?;
                let created_at: String = row
                    .try_get("created_at")
                    .map_err(|e| SecretError::StorageError(e.to_string()))?;
                let updated_at: String = row
                    .try_get("updated_at")
                    .map_err(|e| SecretError::StorageError(e.to_string()))?;
                let last_used_at: Option<String> = row
                    .try_get("last_used_at")
                    .map_err(|e| SecretError::StorageError(e.to_string()))?;

                Ok(WorkflowSecret {
                    name: SecretName::new(&name)
                        .map_err(|e| SecretError::StorageError(e.to_string()))?,
                    scope: parse_scope(&scope)?,
                    created_at: parse_datetime(&created_at)?,
                    updated_at: parse_datetime(&updated_at)?,
                    last_used_at: last_used_at.as_deref().map(parse_datetime).transpose()?,
                })
            })
            .collect()
    }

    async fn touch(
        &self,
        name: &SecretName,
        scope: &SecretScope,
        at: DateTime<Utc>,
    ) -> Result<(), SecretError> {
        sqlx::query("UPDATE secrets SET last_used_at = ? WHERE name = ? AND scope = ?")
            .bind(at.to_rfc3339())
            .bind(name.as_str())
            .bind(scope.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| SecretError::StorageError(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &tempfile::TempDir) -> SqliteSecretStore {
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        SqliteSecretStore::new(pool, VaultCrypto::new(&[7u8; 32]))
    }

    fn name(s: &str) -> SecretName {
        SecretName::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = SecretScope::Project(ProjectId::new());

        store
            .set(&name("API_KEY"), &Redacted::new("s3cret"), &scope)
            .await
            .unwrap();

        let value = store.get(&name("API_KEY"), &scope).await.unwrap().unwrap();
        assert_eq!(value.expose(), "s3cret");
    }

    #[tokio::test]
    async fn test_value_is_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = SecretScope::Project(ProjectId::new());
        store
            .set(&name("TOKEN"), &Redacted::new("plaintext-value"), &scope)
            .await
            .unwrap();

        let row = sqlx::query("SELECT encrypted_value FROM secrets WHERE name = 'TOKEN'")
            .fetch_one(&store.pool.reader)
            .await
            .unwrap();
        let blob: Vec<u8> = row.try_get("encrypted_value").unwrap();
        assert!(!blob.windows(15).any(|w| w == b"plaintext-value"));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = SecretScope::Organization(OrgId::new());

        store
            .set(&name("KEY"), &Redacted::new("old"), &scope)
            .await
            .unwrap();
        store
            .set(&name("KEY"), &Redacted::new("new"), &scope)
            .await
            .unwrap();

        let value = store.get(&name("KEY"), &scope).await.unwrap().unwrap();
        assert_eq!(value.expose(), "new");
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let project = SecretScope::Project(ProjectId::new());
        let org = SecretScope::Organization(OrgId::new());

        store
            .set(&name("KEY"), &Redacted::new("project-value"), &project)
            .await
            .unwrap();

        assert!(store.get(&name("KEY"), &org).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = SecretScope::Project(ProjectId::new());

        store
            .set(&name("KEY"), &Redacted::new("v"), &scope)
            .await
            .unwrap();
        assert!(store.delete(&name("KEY"), &scope).await.unwrap());
        assert!(!store.delete(&name("KEY"), &scope).await.unwrap());
        assert!(store.get(&name("KEY"), &scope).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_touch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let scope = SecretScope::Project(ProjectId::new());

        store
            .set(&name("B_KEY"), &Redacted::new("b"), &scope)
            .await
            .unwrap();
        store
            .set(&name("A_KEY"), &Redacted::new("a"), &scope)
            .await
            .unwrap();

        let listed = store.list(&scope).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name.as_str(), "A_KEY");
        assert!(listed[0].last_used_at.is_none());

        let at = Utc::now();
        store.touch(&name("A_KEY"), &scope, at).await.unwrap();
        let listed = store.list(&scope).await.unwrap();
        assert!(listed[0].last_used_at.is_some());
    }
}
