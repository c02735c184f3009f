//! Directory-backed configuration record store
//!
//! Stores one file per record. Writes go to a temp file that is synced
//! and renamed over the target, so readers never see a partial value.

use super::{async_trait, ApiResult, ConfigStore};
use crate::error::ApiError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the record; `/` and `%` in names are escaped
    pub fn path_for(&self, name: &str) -> PathBuf {
        let escaped = name.replace('%', "%25").replace('/', "%2F");
        self.root.join(escaped)
    }
}

fn io_error(context: &str, err: std::io::Error) -> ApiError {
    match err.kind() {
        ErrorKind::NotFound => ApiError::NotFound(format!("{}: {}", context, err)),
        ErrorKind::PermissionDenied => ApiError::Unauthorized(format!("{}: {}", context, err)),
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            ApiError::Transient(format!("{}: {}", context, err))
        }
        _ => ApiError::Unexpected(format!("{}: {}", context, err)),
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, name: &str) -> ApiResult<String> {
        let path = self.path_for(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&format!("reading {}", path.display()), e))
    }

    async fn put(&self, name: &str, value: &str) -> ApiResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("creating store directory", e))?;

        let path = self.path_for(name);
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error(&format!("creating {}", temp_path.display()), e))?;
        file.write_all(value.as_bytes())
            .await
            .map_err(|e| io_error("writing record", e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("syncing record", e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&format!("renaming into {}", path.display()), e))?;

        debug!(record = name, path = %path.display(), bytes = value.len(), "Record written");
        Ok(())
    }
}
