//! Where summary stores live: a local directory tree or an object store prefix.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::s3::S3Persistence;
use crate::error::PersistenceError;
use crate::models::{SummaryConfig, SummaryStorage};
use crate::utils::write_atomic;

/// Key-value blob storage addressed by `/`-separated keys such as
/// `doc_summary_index_3/docstore.json`.
#[async_trait]
pub trait SummaryPersistence: Send + Sync {
    /// `None` when the key does not exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError>;

    /// Remove every key under `prefix`. Idempotent.
    async fn delete_tree(&self, prefix: &str) -> Result<(), PersistenceError>;

    /// Human-readable location, for logs and `status`.
    fn location(&self) -> String;
}

pub fn create_persistence(config: &SummaryConfig) -> Result<Arc<dyn SummaryPersistence>, PersistenceError> {
    match config.storage {
        SummaryStorage::Local => Ok(Arc::new(LocalPersistence::new(&config.local_dir))),
        SummaryStorage::S3 => Ok(Arc::new(S3Persistence::from_config(config)?)),
    }
}

/// Summary stores under a local directory; writes go through a temp file and rename.
#[derive(Debug, Clone)]
pub struct LocalPersistence {
    root: PathBuf,
}

impl LocalPersistence {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl SummaryPersistence for LocalPersistence {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let path = self.path(key);
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), PersistenceError> {
        match tokio::fs::remove_dir_all(self.path(prefix)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}
