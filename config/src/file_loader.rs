//! Operator configuration from TOML or YAML files, format picked by
//! extension.

use std::path::{Path, PathBuf};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error
    },

    #[error("invalid TOML in {}: {reason}", path.display())]
    Toml { path: PathBuf, reason: String },

    #[error("invalid YAML in {}: {reason}", path.display())]
    Yaml { path: PathBuf, reason: String },

    #[error("unsupported config format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String }
}

fn read(path: &Path) -> Result<String, ConfigFileError> {
    std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source
    })
}

/// Missing sections and fields take their defaults.
pub fn load_from_toml(path: &Path) -> Result<Config, ConfigFileError> {
    toml::from_str(&read(path)?).map_err(|e| ConfigFileError::Toml {
        path: path.to_path_buf(),
        reason: e.to_string()
    })
}

pub fn load_from_yaml(path: &Path) -> Result<Config, ConfigFileError> {
    serde_yaml::from_str(&read(path)?).map_err(|e| ConfigFileError::Yaml {
        path: path.to_path_buf(),
        reason: e.to_string()
    })
}

/// Loads `.toml`, `.yaml` or `.yml`.
///
/// ```rust,no_run
/// use std::path::Path;
///
/// let config = config::load_from_file(Path::new("/etc/codebase-operator/operator.yaml"))?;
/// println!("{} workers", config.worker.workers);
/// # Ok::<(), config::ConfigFileError>(())
/// ```
pub fn load_from_file(path: &Path) -> Result<Config, ConfigFileError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        _ => Err(ConfigFileError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("operator.toml");
        fs::write(
            &path,
            r#"
[workspace]
root = "/srv/working-copies"

[git]
author_name = "ci-bot"
author_email = "ci-bot@example.com"
verify_host_keys = true

[backoff]
min_delay_ms = 500
max_delay_ms = 8000
"#
        )
        .unwrap();

        let config = load_from_toml(&path).unwrap();
        assert_eq!(config.workspace.root.to_str(), Some("/srv/working-copies"));
        assert_eq!(config.git.author_name, "ci-bot");
        assert!(config.git.verify_host_keys);
        assert_eq!(config.git.probe_timeout_ms, 3000);
        assert_eq!(config.backoff.min_delay_ms, 500);
        assert_eq!(config.backoff.dependency_delay_ms, 30_000);
        assert_eq!(config.worker.workers, 3);
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("operator.yml");
        fs::write(
            &path,
            "worker:\n  workers: 6\nbackoff:\n  dependency_delay_ms: 1000\n"
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.worker.workers, 6);
        assert_eq!(config.backoff.dependency_delay_ms, 1000);
        assert_eq!(config.git.author_name, "codebase");
    }

    #[test]
    fn test_load_from_file_rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("operator.json");
        fs::write(&path, "{}").unwrap();

        assert!(matches!(
            load_from_file(&path),
            Err(ConfigFileError::UnsupportedFormat { extension, .. }) if extension == "json"
        ));
        assert!(matches!(
            load_from_file(&dir.path().join("operator")),
            Err(ConfigFileError::UnsupportedFormat { extension, .. }) if extension.is_empty()
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_from_toml(&dir.path().join("absent.toml")),
            Err(ConfigFileError::Read { .. })
        ));
    }
}
