//! Per-request scratch directories.

use crate::error::{Result, ShimError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Scratch directories live under one root, one per request id.
#[derive(Debug, Clone)]
pub struct ScratchDirs {
    root: PathBuf,
}

impl ScratchDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory used by the request with this id.
    pub fn path_for(&self, req_id: &str) -> PathBuf {
        self.root.join(sanitize(req_id))
    }

    /// Create the directory for `req_id`, reusing it if it already exists.
    pub fn create(&self, req_id: &str) -> Result<PathBuf> {
        let path = self.path_for(req_id);
        fs::create_dir_all(&path).map_err(|e| ShimError::io_with_path(e, &path))?;
        debug!("Created scratch dir {}", path.display());
        Ok(path)
    }

    /// Remove the directory for `req_id`. Missing directories are fine.
    pub fn remove(&self, req_id: &str) -> Result<()> {
        let path = self.path_for(req_id);
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!("Removed scratch dir {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShimError::io_with_path(e, &path)),
        }
    }
}

/// Map a request id to a safe single path component.
fn sanitize(req_id: &str) -> String {
    let name: String = req_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn test_create_and_remove() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDirs::new(temp.path().join(".shimrpc"));

        let dir = scratch.create("req/1").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, temp.path().join(".shimrpc").join("req_1"));

        // Creating twice is fine
        scratch.create("req/1").unwrap();

        scratch.remove("req/1").unwrap();
        assert!(!dir.exists());
        scratch.remove("req/1").unwrap();
    }
}
