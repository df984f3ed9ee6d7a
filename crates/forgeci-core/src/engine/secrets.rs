//! Secret resolution for job execution.
//!
//! Resolves each name a job declares against the project scope first, then
//! the organization scope. A name missing from both scopes fails the job
//! before any of its steps run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use forgeci_types::error::SecretError;
use forgeci_types::ids::{OrgId, ProjectId};
use forgeci_types::secret::{Redacted, SecretName, SecretScope};

use crate::repository::secret::SecretStore;

/// Resolves job secret declarations into environment-ready values.
pub struct SecretResolver<S: SecretStore> {
    store: Arc<S>,
}

impl<S: SecretStore> SecretResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve all declared names, project scope shadowing organization
    /// scope. Returns [`SecretError::NotFound`] for the first unresolvable
    /// name; the caller fails the job without partial injection.
    pub async fn resolve(
        &self,
        names: &[SecretName],
        project_id: ProjectId,
        org_id: Option<OrgId>,
    ) -> Result<HashMap<SecretName, Redacted>, SecretError> {
        let project_scope = SecretScope::Project(project_id);
        let org_scope = org_id.map(SecretScope::Organization);
        let now = Utc::now();

        let mut resolved = HashMap::with_capacity(names.len());
        for name in names {
            let (value, scope) = match self.store.get(name, &project_scope).await? {
                Some(value) => (value, project_scope.clone()),
                None => match &org_scope {
                    Some(scope) => match self.store.get(name, scope).await? {
                        Some(value) => (value, scope.clone()),
                        None => return Err(SecretError::NotFound(name.to_string())),
                    },
                    None => return Err(SecretError::NotFound(name.to_string())),
                },
            };
            self.store.touch(name, &scope, now).await?;
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }
}

/// Replace every resolved secret value appearing in `text` with a mask.
/// Applied to captured step output before persistence.
pub fn redact_output(text: &str, secrets: &HashMap<SecretName, Redacted>) -> String {
    let mut redacted = text.to_string();
    for value in secrets.values() {
        let plain = value.expose();
        if !plain.is_empty() && redacted.contains(plain) {
            redacted = redacted.replace(plain, "***");
        }
    }
    redacted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemorySecretStore;

    fn name(s: &str) -> SecretName {
        SecretName::try_from(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_project_scope_shadows_org() {
        let store = Arc::new(MemorySecretStore::new());
        let project_id = ProjectId::new();
        let org_id = OrgId::new();

        let key = name("API_KEY");
        store
            .set(&key, &Redacted::new("org-value"), &SecretScope::Organization(org_id))
            .await
            .unwrap();
        store
            .set(&key, &Redacted::new("project-value"), &SecretScope::Project(project_id))
            .await
            .unwrap();

        let resolver = SecretResolver::new(store);
        let resolved = resolver
            .resolve(&[key.clone()], project_id, Some(org_id))
            .await
            .unwrap();
        assert_eq!(resolved[&key].expose(), "project-value");
    }

    #[tokio::test]
    async fn test_falls_back_to_org_scope() {
        let store = Arc::new(MemorySecretStore::new());
        let project_id = ProjectId::new();
        let org_id = OrgId::new();

        let key = name("DEPLOY_TOKEN");
        store
            .set(&key, &Redacted::new("org-only"), &SecretScope::Organization(org_id))
            .await
            .unwrap();

        let resolver = SecretResolver::new(store);
        let resolved = resolver
            .resolve(&[key.clone()], project_id, Some(org_id))
            .await
            .unwrap();
        assert_eq!(resolved[&key].expose(), "org-only");
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let store = Arc::new(MemorySecretStore::new());
        let resolver = SecretResolver::new(store);
        let err = resolver
            .resolve(&[name("MISSING")], ProjectId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::NotFound(n) if n == "MISSING"));
    }

    #[tokio::test]
    async fn test_resolution_touches_last_used() {
        let store = Arc::new(MemorySecretStore::new());
        let project_id = ProjectId::new();
        let scope = SecretScope::Project(project_id);
        let key = name("TOKEN");
        store.set(&key, &Redacted::new("v"), &scope).await.unwrap();

        let resolver = SecretResolver::new(Arc::clone(&store));
        resolver.resolve(&[key], project_id, None).await.unwrap();

        let entries = store.list(&scope).await.unwrap();
        assert!(entries[0].last_used_at.is_some());
    }

    #[test]
    fn test_redact_output_masks_values() {
        let mut secrets = HashMap::new();
        secrets.insert(name("TOKEN"), Redacted::new("s3cr3t-value"));
        let out = redact_output("token is s3cr3t-value, again s3cr3t-value", &secrets);
        assert_eq!(out, "token is ***, again ***");
    }

    #[test]
    fn test_redact_output_leaves_clean_text() {
        let mut secrets = HashMap::new();
        secrets.insert(name("TOKEN"), Redacted::new("hidden"));
        assert_eq!(redact_output("nothing to see", &secrets), "nothing to see");
    }
}
