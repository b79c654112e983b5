//! On-disk script store keyed by command id.
//!
//! The root directory and every script in it are owner-only (`0700`).
//! A script lives from intake until its run returns, or until crash
//! recovery removes it.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::types::DbId;

/// Mode for the script root directory.
pub const DIR_MODE: u32 = 0o700;

/// Mode for script files: owner read/write/execute.
pub const FILE_MODE: u32 = 0o700;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to prepare script directory {path}: {source}")]
    Prepare { path: PathBuf, source: io::Error },

    #[error("failed to write script {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Filesystem store for submitted scripts.
#[derive(Debug, Clone)]
pub struct ScriptStorage {
    root: PathBuf,
}

impl ScriptStorage {
    /// Create the root directory if needed and force it to [`DIR_MODE`].
    ///
    /// Must succeed before intake accepts scripts or any run starts.
    pub async fn prepare(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let prepare_err = |source| StorageError::Prepare {
            path: root.clone(),
            source,
        };

        tokio::fs::create_dir_all(&root).await.map_err(prepare_err)?;
        tokio::fs::set_permissions(&root, std::fs::Permissions::from_mode(DIR_MODE))
            .await
            .map_err(prepare_err)?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the script for `id`. Files are named by the bare id.
    pub fn path_for(&self, id: DbId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Write `body` as the script for `id`, replacing any previous file.
    ///
    /// On failure the partially written file is removed.
    pub async fn write(&self, id: DbId, body: &str) -> Result<PathBuf, StorageError> {
        use tokio::io::AsyncWriteExt;

        let path = self.path_for(id);
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&path)
                .await?;
            file.write_all(body.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        match result {
            Ok(()) => Ok(path),
            Err(source) => {
                let _ = self.remove(id).await;
                Err(StorageError::Write { path, source })
            }
        }
    }

    /// Delete the script for `id`. A missing file is not an error.
    pub async fn remove(&self, id: DbId) -> io::Result<()> {
        ignore_missing(tokio::fs::remove_file(self.path_for(id)).await)
    }

    /// Delete the script for `id` from a non-async context such as `Drop`,
    /// then hand the result to `then`.
    ///
    /// Inside a tokio runtime the unlink and `then` run on the blocking
    /// pool; outside one they run inline.
    pub fn remove_detached<F>(&self, id: DbId, then: F)
    where
        F: FnOnce(io::Result<()>) + Send + 'static,
    {
        let path = self.path_for(id);
        let task = move || then(ignore_missing(std::fs::remove_file(path)));
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => task(),
        }
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
