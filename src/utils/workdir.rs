use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

const SOCKETS_DIR: &str = "sockets";

/// Directory holding the rendered config, snapshot, pid file and sockets
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Create the directory and its `sockets/` subdirectory if missing.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let sockets = root.join(SOCKETS_DIR);
        tokio::fs::create_dir_all(&sockets)
            .await
            .wrap_err_with(|| format!("Failed to create working directory {}", sockets.display()))?;
        tracing::debug!("Working directory ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sockets_dir(&self) -> PathBuf {
        self.root.join(SOCKETS_DIR)
    }

    /// Resolve a relative path against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_with_sockets_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::create(tmp.path().join("hactl")).await.unwrap();
        assert!(work_dir.sockets_dir().is_dir());

        // creating again is fine
        WorkDir::create(tmp.path().join("hactl")).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve() {
        let tmp = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::create(tmp.path()).await.unwrap();
        assert_eq!(work_dir.resolve("haproxy.cfg"), tmp.path().join("haproxy.cfg"));
        assert_eq!(
            work_dir.resolve("/etc/haproxy.cfg"),
            PathBuf::from("/etc/haproxy.cfg")
        );
    }
}
