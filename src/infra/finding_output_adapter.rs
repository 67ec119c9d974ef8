use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::app::ports::FindingProcessorPort;
use crate::common::error::{RecordError, Result};
use crate::domain::CanonicalFinding;

/// Appends each finding as one JSON line.
pub struct NdjsonFindingSink {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl NdjsonFindingSink {
    pub async fn create(dir: &Path, file_name: &str) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        info!("Writing findings to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FindingProcessorPort for NdjsonFindingSink {
    async fn process(&self, finding: &CanonicalFinding) -> std::result::Result<(), RecordError> {
        let mut line = serde_json::to_vec(finding).map_err(|e| RecordError::Processing(e.to_string()))?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| RecordError::Processing(format!("{}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| RecordError::Processing(e.to_string()))
    }
}

/// Accepts and drops everything; used when no output directory is configured.
pub struct DiscardingSink;

#[async_trait]
impl FindingProcessorPort for DiscardingSink {
    async fn process(&self, _finding: &CanonicalFinding) -> std::result::Result<(), RecordError> {
        Ok(())
    }
}
