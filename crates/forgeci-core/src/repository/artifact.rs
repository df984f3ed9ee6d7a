//! Artifact store trait definition.

use chrono::{DateTime, Utc};
use forgeci_types::ids::RunId;
use forgeci_types::run::WorkflowArtifact;
use thiserror::Error;

/// Errors from artifact storage.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("artifact '{0}' has expired")]
    Expired(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for artifact persistence: metadata rows plus backing bytes.
///
/// Artifacts are write-once per `(run, name)`; `put` with an existing name
/// replaces the previous version. Expiry is enforced on read and by the
/// background reaper via `purge_expired`.
pub trait ArtifactStore: Send + Sync {
    /// Store named bytes for a run with a time-to-live. Records a sha256
    /// checksum and sets `expires_at = now + ttl`.
    fn put(
        &self,
        run_id: &RunId,
        name: &str,
        bytes: &[u8],
        ttl: chrono::Duration,
    ) -> impl std::future::Future<Output = Result<WorkflowArtifact, ArtifactError>> + Send;

    /// Fetch an artifact's bytes. Expired artifacts are reported as
    /// [`ArtifactError::Expired`], missing ones as [`ArtifactError::NotFound`].
    fn get(
        &self,
        run_id: &RunId,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ArtifactError>> + Send;

    /// List a run's artifact metadata.
    fn list(
        &self,
        run_id: &RunId,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowArtifact>, ArtifactError>> + Send;

    /// Delete all artifacts whose `expires_at` is before `now`, rows and
    /// bytes both. Returns the number deleted.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, ArtifactError>> + Send;
}
