use std::path::{Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;

use super::ensure_directory;
use crate::error::StorageError;
use crate::sanitize::redact_path;

/// A uniquely named scratch directory, removed on drop unless kept.
#[derive(Debug)]
pub struct ImportTempDir {
    path: PathBuf,
    keep: bool,
}

impl ImportTempDir {
    /// Creates `<base>/<prefix>-<uuid>`.
    pub fn create_in(base: &Path, prefix: &str) -> Result<Self, StorageError> {
        let path = base.join(format!("{}-{}", prefix, Uuid::new_v4().simple()));
        ensure_directory(&path)?;
        debug!("Created temp directory {}", redact_path(&path));
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leaves the directory on disk when dropped.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }
}

impl Drop for ImportTempDir {
    fn drop(&mut self) {
        if self.keep {
            debug!("Keeping temp directory {}", redact_path(&self.path));
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove temp directory {}: {}",
                    redact_path(&self.path),
                    e
                );
            }
        }
    }
}
