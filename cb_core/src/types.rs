use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::{Validate, ValidationError};
use zeroize::Zeroizing;

/// Secret field holding a PEM-encoded SSH private key.
pub const SECRET_SSH_KEY: &str = "id_rsa";
/// Secret field holding an access token.
pub const SECRET_TOKEN: &str = "token";
/// Secret field holding the user the token belongs to.
pub const SECRET_USERNAME: &str = "username";

/// Generic finalizer asking the storage layer to delete dependents first.
/// Storage completes the deletion itself; it never blocks on reconcilers.
pub const FOREGROUND_DELETION: &str = "foregroundDeletion";

/// Git hosting provider of a GitServer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GitProvider {
    Github,
    Gitlab,
    Bitbucket,
    Gerrit,
    #[default]
    Other,
}

impl GitProvider {
    /// Parses a provider name, mapping anything unknown to `Other`.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(Self::Other)
    }
}

/// Identity of a namespaced object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata shared by every stored object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }
}

/// Outcome of the most recent reconciliation, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatusPhase {
    #[default]
    Pending,
    Finished,
    Postponed,
    Failed,
}

/// Reconciliation status fields owned by the driver.
///
/// `failure_count` only ever grows while attempts fail; a successful attempt
/// writes a fresh status in which it starts over from zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStatus {
    #[serde(default)]
    pub phase: StatusPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// How far a working copy has been brought in line with the git server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GitProgress {
    #[default]
    Pending,
    Initialized,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CodebaseStrategy {
    /// Start from an empty repository and push it to the git server.
    #[default]
    Create,
    /// Copy an external repository onto the git server.
    Clone,
    /// Adopt a repository that already lives on the git server.
    Import,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_codebase_spec"))]
pub struct CodebaseSpec {
    pub strategy: CodebaseStrategy,
    #[validate(length(min = 1))]
    pub ci_tool: String,
    /// Repository path on the git server, e.g. `/team/app`.
    #[validate(length(min = 1))]
    pub git_url_path: String,
    /// Name of the GitServer in the codebase's namespace.
    #[validate(length(min = 1))]
    pub git_server: String,
    /// Source repository for the `clone` strategy.
    #[serde(default)]
    pub repository_url: Option<String>,
    /// Secret in the codebase's namespace holding credentials for
    /// `repository_url`; unset means the source is public.
    #[serde(default)]
    pub repository_secret: Option<String>,
    #[validate(length(min = 1))]
    pub default_branch: String,
    #[serde(default)]
    pub empty_project: bool,
}

fn validate_codebase_spec(spec: &CodebaseSpec) -> Result<(), ValidationError> {
    if !spec.git_url_path.starts_with('/') {
        return Err(ValidationError::new("git_url_path")
            .with_message(Cow::Borrowed("gitUrlPath must start with '/'")));
    }
    let has_source = spec
        .repository_url
        .as_deref()
        .is_some_and(|url| !url.is_empty());
    if spec.strategy == CodebaseStrategy::Clone && !has_source {
        return Err(ValidationError::new("repository_url")
            .with_message(Cow::Borrowed("clone strategy requires repositoryUrl")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseStatus {
    #[serde(flatten)]
    pub reconcile: ReconcileStatus,
    #[serde(default)]
    pub git: GitProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebase {
    pub meta: ObjectMeta,
    pub spec: CodebaseSpec,
    #[serde(default)]
    pub status: CodebaseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseBranchSpec {
    #[validate(length(min = 1))]
    pub codebase_name: String,
    #[validate(length(min = 1), custom(function = "validate_ref_name"))]
    pub branch_name: String,
    /// Branch, tag or commit hash to branch from; empty means HEAD.
    #[serde(default)]
    pub from_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseBranchStatus {
    #[serde(flatten)]
    pub reconcile: ReconcileStatus,
    #[serde(default)]
    pub git: GitProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebaseBranch {
    pub meta: ObjectMeta,
    pub spec: CodebaseBranchSpec,
    #[serde(default)]
    pub status: CodebaseBranchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GitTagSpec {
    #[validate(length(min = 1))]
    pub codebase: String,
    #[validate(length(min = 1))]
    pub branch: String,
    #[validate(length(min = 1), custom(function = "validate_ref_name"))]
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitTag {
    pub meta: ObjectMeta,
    pub spec: GitTagSpec,
    #[serde(default)]
    pub status: ReconcileStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_git_server_spec"))]
pub struct GitServerSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub provider: GitProvider,
    /// Secret holding the SSH key or token; absent for public servers.
    #[serde(default)]
    pub secret_name: Option<String>,
    /// Explicit base URL (e.g. a `file://` mirror) overriding host and port.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_ssh_user() -> String {
    "git".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn validate_git_server_spec(spec: &GitServerSpec) -> Result<(), ValidationError> {
    if spec.host.is_empty() && spec.base_url.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::new("host")
            .with_message(Cow::Borrowed("either host or baseUrl is required")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitServerStatus {
    #[serde(flatten)]
    pub reconcile: ReconcileStatus,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitServer {
    pub meta: ObjectMeta,
    pub spec: GitServerSpec,
    #[serde(default)]
    pub status: GitServerStatus,
}

/// Credential material referenced by a GitServer.
#[derive(Clone, Default)]
pub struct Secret {
    pub key: ObjectKey,
    pub data: BTreeMap<String, Zeroizing<Vec<u8>>>,
}

impl Secret {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            data: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: &str, value: impl Into<Vec<u8>>) -> Self {
        self.data
            .insert(field.to_string(), Zeroizing::new(value.into()));
        self
    }

    /// Returns a non-empty UTF-8 field.
    pub fn field(&self, field: &str) -> Option<Zeroizing<String>> {
        let raw = self.data.get(field)?;
        let text = std::str::from_utf8(raw).ok()?;
        if text.trim().is_empty() {
            return None;
        }
        Some(Zeroizing::new(text.to_string()))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("key", &self.key)
            .field("fields", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn validate_ref_name(name: &str) -> Result<(), ValidationError> {
    let invalid = name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.contains("//")
        || name.contains("@{")
        || name
            .chars()
            .any(|c| c.is_ascii_control() || " ~^:?*[\\".contains(c));
    if invalid {
        return Err(ValidationError::new("ref_name")
            .with_message(Cow::Owned(format!("'{name}' is not a valid git ref name"))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codebase_spec(strategy: CodebaseStrategy) -> CodebaseSpec {
        CodebaseSpec {
            strategy,
            ci_tool: "tekton".to_string(),
            git_url_path: "/team/app".to_string(),
            git_server: "gerrit".to_string(),
            repository_url: None,
            default_branch: "main".to_string(),
            repository_secret: None,
            empty_project: false,
        }
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!(GitProvider::from_name("GitLab"), GitProvider::Gitlab);
        assert_eq!(GitProvider::from_name("gerrit"), GitProvider::Gerrit);
        assert_eq!(GitProvider::from_name("gitea"), GitProvider::Other);
        assert_eq!(GitProvider::Bitbucket.to_string(), "bitbucket");
    }

    #[test]
    fn test_clone_strategy_requires_source() {
        let spec = codebase_spec(CodebaseStrategy::Clone);
        assert!(spec.validate().is_err());

        let spec = CodebaseSpec {
            repository_url: Some("https://github.com/org/app.git".to_string()),
            ..codebase_spec(CodebaseStrategy::Clone)
        };
        assert!(spec.validate().is_ok());
        assert!(codebase_spec(CodebaseStrategy::Create).validate().is_ok());
    }

    #[test]
    fn test_git_url_path_must_be_absolute() {
        let spec = CodebaseSpec {
            git_url_path: "team/app".to_string(),
            ..codebase_spec(CodebaseStrategy::Import)
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_branch_name_validation() {
        let spec = CodebaseBranchSpec {
            codebase_name: "app".to_string(),
            branch_name: "release/1.0".to_string(),
            from_commit: None,
        };
        assert!(spec.validate().is_ok());

        let spec = CodebaseBranchSpec {
            branch_name: "bad..name".to_string(),
            ..spec
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_secret_field_and_redacted_debug() {
        let secret = Secret::new(ObjectKey::new("dev", "gerrit-creds"))
            .with_field(SECRET_TOKEN, "s3cr3t")
            .with_field(SECRET_USERNAME, "   ");

        assert_eq!(secret.field(SECRET_TOKEN).as_deref().map(String::as_str), Some("s3cr3t"));
        assert!(secret.field(SECRET_USERNAME).is_none());
        assert!(secret.field(SECRET_SSH_KEY).is_none());
        assert!(!format!("{secret:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_default_secret_is_empty() {
        let secret = Secret::default();
        assert_eq!(secret.key, ObjectKey::default());
        assert!(secret.key.name.is_empty());
        assert!(secret.data.is_empty());
        assert!(secret.field(SECRET_TOKEN).is_none());
    }

    #[test]
    fn test_status_serializes_flattened() {
        let status = CodebaseStatus {
            reconcile: ReconcileStatus {
                phase: StatusPhase::Failed,
                message: "boom".to_string(),
                failure_count: 2,
                updated_at: None,
            },
            git: GitProgress::Initialized,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["failureCount"], 2);
        assert_eq!(json["git"], "initialized");
    }
}
