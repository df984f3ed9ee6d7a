//! Collaborator trait definitions: project identity and permissions.
//!
//! Projects, users, and permissions live outside this engine. These two
//! traits are the only surface the engine consumes from them: the current
//! branch of a project's repository (for push-style trigger payload
//! defaults) and the edit gate for manual triggers and workflow mutation.

use forgeci_types::error::RepositoryError;
use forgeci_types::ids::{OrgId, ProjectId, UserId};

/// Read-side view of the project's git repository state and ownership.
pub trait ProjectRepository: Send + Sync {
    /// The currently checked-out branch of the project.
    fn current_branch(
        &self,
        project_id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<String, RepositoryError>> + Send;

    /// The organization owning the project, if any. Determines whether
    /// org-scoped secrets are visible to the project's runs.
    fn org_of(
        &self,
        project_id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<Option<OrgId>, RepositoryError>> + Send;
}

/// Permission gate consumed by manual triggers and workflow save/delete.
pub trait PermissionService: Send + Sync {
    /// Whether the user may edit the project (and thus dispatch manual runs).
    fn can_edit(
        &self,
        user_id: &UserId,
        project_id: &ProjectId,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
