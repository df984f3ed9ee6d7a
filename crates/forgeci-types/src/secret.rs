use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{OrgId, ProjectId};

use std::fmt;

/// A validated secret name (e.g., "DEPLOY_TOKEN").
///
/// Names are uppercase identifiers: `[A-Z][A-Z0-9_]*`. They double as the
/// environment variable names injected into job steps, so the grammar is
/// deliberately narrow.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName(String);

impl SecretName {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some('A'..='Z'))
            && chars.all(|c| matches!(c, 'A'..='Z' | '0'..='9' | '_'));
        if valid {
            Ok(Self(name))
        } else {
            Err(ValidationError::SecretName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SecretName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretName> for String {
    fn from(name: SecretName) -> Self {
        name.0
    }
}

impl fmt::Debug for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretName(\"{}\")", self.0)
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope determines which runs may resolve a secret.
///
/// Exactly one owner: a secret belongs either to a project or to an
/// organization, never both. Project-scoped secrets shadow organization
/// secrets of the same name during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretScope {
    /// Available only to runs of the owning project.
    Project(ProjectId),
    /// Available to runs of every project in the organization.
    Organization(OrgId),
}

impl fmt::Display for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretScope::Project(id) => write!(f, "project:{id}"),
            SecretScope::Organization(id) => write!(f, "org:{id}"),
        }
    }
}

/// Metadata about a stored secret (the plaintext value is never in this
/// struct; it lives encrypted at rest and is only surfaced as [`Redacted`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSecret {
    pub name: SecretName,
    pub scope: SecretScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time a run resolved this secret.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A wrapper that redacts secret values in Debug and Display output.
///
/// Use this to wrap any `String` that might contain sensitive data.
/// The actual value is accessible via `.expose()`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Redacted(String);

impl Redacted {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Show masked representation: last 4 chars visible.
    pub fn masked(&self) -> String {
        if self.0.len() <= 4 {
            "****".to_string()
        } else {
            format!("****{}", &self.0[self.0.len() - 4..])
        }
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Redacted(\"***\")")
    }
}

impl fmt::Display for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_name_accepts_uppercase_identifiers() {
        assert!(SecretName::new("DEPLOY_TOKEN").is_ok());
        assert!(SecretName::new("A").is_ok());
        assert!(SecretName::new("NPM_TOKEN_2").is_ok());
    }

    #[test]
    fn test_secret_name_rejects_bad_grammar() {
        assert!(SecretName::new("").is_err());
        assert!(SecretName::new("deploy_token").is_err());
        assert!(SecretName::new("2FA_CODE").is_err());
        assert!(SecretName::new("_LEADING").is_err());
        assert!(SecretName::new("HAS SPACE").is_err());
    }

    #[test]
    fn test_secret_name_serde_validates() {
        let ok: Result<SecretName, _> = serde_json::from_str("\"API_KEY\"");
        assert!(ok.is_ok());
        let bad: Result<SecretName, _> = serde_json::from_str("\"api-key\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_redacted_debug_hides_value() {
        let secret = Redacted::new("tok-abc123xyz");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("abc123xyz"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_redacted_display_hides_value() {
        let secret = Redacted::new("tok-abc123xyz");
        let display = format!("{}", secret);
        assert!(!display.contains("abc123xyz"));
    }

    #[test]
    fn test_redacted_expose() {
        let secret = Redacted::new("tok-abc123xyz");
        assert_eq!(secret.expose(), "tok-abc123xyz");
    }

    #[test]
    fn test_redacted_masked() {
        let secret = Redacted::new("tok-abc123xyz");
        assert_eq!(secret.masked(), "****3xyz");
    }

    #[test]
    fn test_redacted_masked_short() {
        let secret = Redacted::new("ab");
        assert_eq!(secret.masked(), "****");
    }

    #[test]
    fn test_secret_scope_display() {
        let scope = SecretScope::Project(ProjectId::new());
        assert!(scope.to_string().starts_with("project:"));
        let scope = SecretScope::Organization(OrgId::new());
        assert!(scope.to_string().starts_with("org:"));
    }
}
