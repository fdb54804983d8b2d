//! Turns a GitServer and its secret into credentials and remote URLs.

use cb_core::{
    Codebase, GitProvider, GitServer, ObjectKey, Resource, SECRET_SSH_KEY, SECRET_TOKEN,
    SECRET_USERNAME, Secret
};
use gitops::{AuthMethod, RepositoryConfig};

use crate::error::StepError;
use crate::services::Services;

/// Everything needed to talk to one repository on a git server.
#[derive(Debug)]
pub struct RepositoryAccess {
    pub url: String,
    pub auth: Option<AuthMethod>
}

impl RepositoryAccess {
    pub fn auth(&self) -> Option<&AuthMethod> {
        self.auth.as_ref()
    }
}

/// Builds repository configuration from a GitServer and its secret.
///
/// Gerrit is always reached over SSH. Other providers use the token when the
/// secret has one and fall back to the SSH key. No secret means public.
pub fn repository_config(server: &GitServer, secret: Option<&Secret>) -> Result<RepositoryConfig, StepError> {
    let spec = &server.spec;
    let config = RepositoryConfig::public(spec.provider);
    let Some(secret) = secret else {
        return Ok(config);
    };

    let ssh_key = secret.field(SECRET_SSH_KEY);
    let token = secret.field(SECRET_TOKEN);
    let action = format!("read credentials from secret {}", secret.key);

    match (spec.provider, ssh_key, token) {
        (GitProvider::Gerrit, Some(key), _) | (_, Some(key), None) => {
            Ok(config.with_ssh(key, Some(spec.ssh_user.clone()), Some(spec.ssh_port)))
        }
        (GitProvider::Gerrit, None, _) => Err(StepError::precondition(
            action,
            format!("gerrit requires the '{SECRET_SSH_KEY}' field")
        )),
        (_, _, Some(token)) => {
            let username = secret
                .field(SECRET_USERNAME)
                .map(|name| name.trim().to_string())
                .unwrap_or_default();
            Ok(config.with_token(token, username))
        }
        (_, None, None) => Err(StepError::precondition(
            action,
            format!("secret has neither '{SECRET_SSH_KEY}' nor '{SECRET_TOKEN}'")
        ))
    }
}

/// Remote URL of `path` on a git server.
///
/// An explicit `base_url` wins. Otherwise SSH credentials select
/// `ssh://user@host:port/path` with the user and port they resolved to,
/// anything else `https://host/path`.
pub fn remote_url(server: &GitServer, auth: Option<&AuthMethod>, path: &str) -> String {
    let spec = &server.spec;
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    if let Some(base) = spec.base_url.as_deref().filter(|base| !base.is_empty()) {
        return format!("{}{path}", base.trim_end_matches('/'));
    }
    if let Some(AuthMethod::Ssh { user, port, .. }) = auth {
        return format!("ssh://{user}@{}:{port}{path}", spec.host);
    }
    format!("https://{}{path}", spec.host)
}

/// Credentials for an external repository, taken from a secret holding
/// either `token` (with optional `username`) or `id_rsa`.
pub fn source_config(secret: &Secret) -> Result<RepositoryConfig, StepError> {
    let config = RepositoryConfig::public(GitProvider::Other);
    if let Some(token) = secret.field(SECRET_TOKEN) {
        let username = secret
            .field(SECRET_USERNAME)
            .map(|name| name.trim().to_string())
            .unwrap_or_default();
        return Ok(config.with_token(token, username));
    }
    if let Some(key) = secret.field(SECRET_SSH_KEY) {
        return Ok(config.with_ssh(key, None, None));
    }
    Err(StepError::precondition(
        format!("read credentials from secret {}", secret.key),
        format!("secret has neither '{SECRET_TOKEN}' nor '{SECRET_SSH_KEY}'")
    ))
}

/// Resolves credentials for a codebase's `repository_url`. No secret
/// reference means the source is public.
pub fn source_auth(services: &Services, codebase: &Codebase) -> Result<Option<AuthMethod>, StepError> {
    let Some(name) = codebase.spec.repository_secret.as_deref().filter(|name| !name.is_empty()) else {
        return Ok(None);
    };
    let secret = load_secret(services, &ObjectKey::new(&codebase.meta.namespace, name))?;
    source_config(&secret)?
        .resolve()
        .map_err(|e| StepError::git(format!("resolve credentials from secret {}", secret.key), e))
}

fn load_secret(services: &Services, key: &ObjectKey) -> Result<Secret, StepError> {
    services
        .secrets
        .get_secret(key)
        .map_err(|e| StepError::store(format!("load secret {key}"), e))?
        .ok_or_else(|| StepError::precondition(format!("load secret {key}"), "not found"))
}

/// Loads the GitServer and secret named by a codebase and resolves access to
/// the codebase's repository.
pub fn codebase_access(services: &Services, codebase: &Codebase) -> Result<RepositoryAccess, StepError> {
    let key = ObjectKey::new(&codebase.meta.namespace, &codebase.spec.git_server);
    let server = services
        .git_servers
        .get(&key)
        .map_err(|e| StepError::store(format!("load git server {key}"), e))?
        .ok_or_else(|| StepError::precondition(format!("load git server {key}"), "not found"))?;
    server_access(services, &server, &codebase.spec.git_url_path)
}

pub fn server_access(services: &Services, server: &GitServer, path: &str) -> Result<RepositoryAccess, StepError> {
    let secret = match server.spec.secret_name.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => Some(load_secret(services, &ObjectKey::new(&server.meta.namespace, name))?),
        None => None
    };

    let config = repository_config(server, secret.as_ref())?;
    let auth = config
        .resolve()
        .map_err(|e| StepError::git(format!("resolve credentials for git server {}", server.key()), e))?;
    let url = remote_url(server, auth.as_ref(), path);
    Ok(RepositoryAccess { url, auth })
}
