//! Secret store trait definition.

use chrono::{DateTime, Utc};
use forgeci_types::error::SecretError;
use forgeci_types::secret::{Redacted, SecretName, SecretScope, WorkflowSecret};

/// Trait for secret storage backends.
///
/// Implementations keep the value encrypted at rest and only surface it as
/// [`Redacted`]. The resolver in `engine::secrets` layers project-over-org
/// precedence on top of this flat `(scope, name)` keyed interface.
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret value by name and scope.
    /// Returns None if the secret does not exist in this scope.
    fn get(
        &self,
        name: &SecretName,
        scope: &SecretScope,
    ) -> impl std::future::Future<Output = Result<Option<Redacted>, SecretError>> + Send;

    /// Store a secret value (insert or overwrite).
    fn set(
        &self,
        name: &SecretName,
        value: &Redacted,
        scope: &SecretScope,
    ) -> impl std::future::Future<Output = Result<(), SecretError>> + Send;

    /// Delete a secret. Returns `true` if it existed.
    fn delete(
        &self,
        name: &SecretName,
        scope: &SecretScope,
    ) -> impl std::future::Future<Output = Result<bool, SecretError>> + Send;

    /// List all secret entries (metadata only, no values) for a given scope.
    fn list(
        &self,
        scope: &SecretScope,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSecret>, SecretError>> + Send;

    /// Update a secret's `last_used_at` after a successful resolution.
    fn touch(
        &self,
        name: &SecretName,
        scope: &SecretScope,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), SecretError>> + Send;
}
