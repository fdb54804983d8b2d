//! Owner-read-only key files for libgit2's SSH transport.
//!
//! libssh2 reads private keys from disk. The file lives exactly as long as
//! the [`SshKeyFile`] value: it is removed when the value drops, which covers
//! early returns, `?` propagation and unwinding alike.

use std::io::Write;
use std::path::Path;

use errors::{GitError, GitResult};
use tempfile::NamedTempFile;

use crate::auth::SshPrivateKey;

pub struct SshKeyFile {
    file: NamedTempFile
}

impl SshKeyFile {
    pub fn write(key: &SshPrivateKey) -> GitResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("cbo-ssh-")
            .suffix(".key")
            .tempfile()
            .map_err(|e| GitError::io("create ssh key file", std::env::temp_dir(), e))?;

        let path = file.path().to_path_buf();
        file.write_all(key.pem().as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| GitError::io("write ssh key file", &path, e))?;
        restrict_to_owner_read(&path)?;

        tracing::debug!(path = %file.path().display(), "ssh key file written");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(unix)]
fn restrict_to_owner_read(path: &Path) -> GitResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400))
        .map_err(|e| GitError::io("restrict ssh key file", path, e))
}

#[cfg(not(unix))]
fn restrict_to_owner_read(path: &Path) -> GitResult<()> {
    let mut permissions = std::fs::metadata(path)
        .map_err(|e| GitError::io("restrict ssh key file", path, e))?
        .permissions();
    permissions.set_readonly(true);
    std::fs::set_permissions(path, permissions).map_err(|e| GitError::io("restrict ssh key file", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::openssh_pem;

    fn key() -> SshPrivateKey {
        SshPrivateKey::parse(&openssh_pem("none")).unwrap()
    }

    #[test]
    fn test_key_file_is_owner_read_only_and_removed_on_drop() {
        let file = SshKeyFile::write(&key()).unwrap();
        let path = file.path().to_path_buf();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), key().pem());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        }

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_key_file_removed_on_error_path() {
        fn failing_operation(captured: &mut Option<std::path::PathBuf>) -> GitResult<()> {
            let file = SshKeyFile::write(&key())?;
            *captured = Some(file.path().to_path_buf());
            Err(GitError::backend("push", "remote hung up"))
        }

        let mut captured = None;
        assert!(failing_operation(&mut captured).is_err());
        assert!(!captured.unwrap().exists());
    }

    #[test]
    fn test_key_file_removed_on_panic() {
        let mut captured = None;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let file = SshKeyFile::write(&key()).unwrap();
            captured = Some(file.path().to_path_buf());
            panic!("operation aborted");
        }));

        assert!(result.is_err());
        assert!(!captured.unwrap().exists());
    }
}
