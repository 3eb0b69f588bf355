//! `watchers.json` persistence

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::model::WatcherSpec;
use crate::Result;

/// Ordered list of watcher specs on disk
#[derive(Debug, Clone)]
pub struct WatcherStore {
    path: PathBuf,
}

impl WatcherStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every persisted watcher; a missing file is an empty set
    pub async fn load(&self) -> Result<Vec<WatcherSpec>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let specs: Vec<WatcherSpec> = serde_json::from_str(&content)?;
        info!("Loaded {} watchers from {:?}", specs.len(), self.path);
        Ok(specs)
    }

    pub async fn save(&self, specs: &[WatcherSpec]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(specs)?;
        tokio::fs::write(&self.path, content).await?;
        debug!("Saved {} watchers", specs.len());
        Ok(())
    }
}
