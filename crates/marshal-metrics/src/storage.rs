//! Outcome log persistence

use marshal_core::{OutcomeRecord, Result};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Where outcomes are persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    /// Nothing outlives the process
    Memory,
    /// Append-only JSONL file
    AppendFile(PathBuf),
}

/// Outcome log abstraction
pub struct OutcomeLog {
    mode: LogMode,
}

impl OutcomeLog {
    pub fn new(mode: LogMode) -> Self {
        Self { mode }
    }

    /// Create an in-memory log
    pub fn memory() -> Self {
        Self::new(LogMode::Memory)
    }

    /// Create an append-file log
    pub fn append_file(path: impl Into<PathBuf>) -> Self {
        Self::new(LogMode::AppendFile(path.into()))
    }

    pub fn mode(&self) -> &LogMode {
        &self.mode
    }

    /// Append one outcome
    pub async fn append(&self, outcome: &OutcomeRecord) -> Result<()> {
        match &self.mode {
            LogMode::Memory => Ok(()),
            LogMode::AppendFile(path) => Self::append_to_file(path, outcome).await,
        }
    }

    /// Load every persisted outcome (for replay at startup)
    pub async fn load_all(&self) -> Result<Vec<OutcomeRecord>> {
        match &self.mode {
            LogMode::Memory => Ok(Vec::new()),
            LogMode::AppendFile(path) => Self::load_all_from_file(path).await,
        }
    }

    async fn append_to_file(path: &PathBuf, outcome: &OutcomeRecord) -> Result<()> {
        let line = serde_json::to_string(outcome)?;

        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;

        debug!("Appended outcome for {} to {:?}", outcome.agent_id, path);
        Ok(())
    }

    async fn load_all_from_file(path: &PathBuf) -> Result<Vec<OutcomeRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path).await?;
        let mut outcomes = Vec::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<OutcomeRecord>(line) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    debug!("Failed to parse outcome line: {}", e);
                }
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_file_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history/outcomes.jsonl");

        let log = OutcomeLog::append_file(&path);
        log.append(&OutcomeRecord::new("trend-scout", "trend", true, 50.0, 2.0))
            .await
            .unwrap();
        log.append(&OutcomeRecord::new("writer-1", "content", false, 80.0, 6.0))
            .await
            .unwrap();

        let all = log.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].agent_id, "trend-scout");
        assert!(!all[1].success);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let good = serde_json::to_string(&OutcomeRecord::new("a", "trend", true, 1.0, 1.0)).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n\n", good)).unwrap();

        let all = OutcomeLog::append_file(&path).load_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_log_loads_nothing() {
        let log = OutcomeLog::memory();
        log.append(&OutcomeRecord::new("a", "trend", true, 1.0, 1.0))
            .await
            .unwrap();
        assert!(log.load_all().await.unwrap().is_empty());
    }
}
