//! Append-only replay log.
//!
//! One JSONL record per terminal turn, including denials. The log exists
//! for replay and observability; a write failure must never break a turn,
//! so the engine logs and swallows append errors.

use crate::emotion::Emotion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Errors from log appends.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One replayable turn record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub npc_id: String,
    pub player_id: String,
    pub raw_text: String,
    pub slot: String,
    pub final_text: String,
    pub emotion_pre: Emotion,
    pub emotion_final: Emotion,
    pub ooc_risk: f32,
    pub deny_reason: Option<String>,
    pub latency_ms: u64,
}

/// Append-only JSONL log of turn records.
#[derive(Debug, Clone)]
pub struct TurnLog {
    path: PathBuf,
}

impl TurnLog {
    /// Create a log writing to the given path. The file is created on
    /// first append.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    pub async fn append(&self, record: &TurnRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Read back all records, oldest first. Intended for replay tooling
    /// and tests.
    pub async fn read_all(&self) -> Result<Vec<TurnRecord>, LogError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}
