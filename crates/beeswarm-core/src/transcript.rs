//! Conversation transcripts persisted as JSON arrays of messages.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::types::Message;

/// Directory of `session_<timestamp>.json` transcript files.
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    dir: PathBuf,
}

impl TranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh file path stamped with the current time.
    pub fn session_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        self.dir.join(format!("session_{stamp}.json"))
    }

    /// Append a batch to the transcript at `path`.
    ///
    /// Reads the existing array if present, pushes the batch and rewrites the
    /// whole file. Not atomic; concurrent writers lose updates.
    pub async fn append_batch(&self, path: &Path, batch: &[Message]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut messages = Self::load(path).await?;
        messages.extend_from_slice(batch);

        let json = serde_json::to_string_pretty(&messages)?;
        tokio::fs::write(path, json).await?;

        debug!(path = %path.display(), added = batch.len(), total = messages.len(), "Transcript written");
        Ok(())
    }

    /// Read a transcript file; a missing file is an empty transcript.
    pub async fn load(path: &Path) -> Result<Vec<Message>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
