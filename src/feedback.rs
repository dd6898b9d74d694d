//! Append-only answer feedback log (`feedback/feedback_log.jsonl`).

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub question: String,
    pub answer: String,
    pub vote: Vote,
    pub timestamp: DateTime<Utc>,
}

pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    pub fn record(&self, question: &str, answer: &str, vote: Vote) -> Result<FeedbackRecord> {
        let record = FeedbackRecord {
            question: question.to_string(),
            answer: answer.to_string(),
            vote,
            timestamp: Utc::now(),
        };

        let mut line = serde_json::to_string(&record).map_err(|e| {
            Error::storage(&self.path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            storage::ensure_dir(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::storage(&self.path, e))?;

        tracing::info!(vote = ?vote, "recorded feedback");
        Ok(record)
    }

    /// All records in append order. Unparseable lines are skipped.
    pub fn read_all(&self) -> Result<Vec<FeedbackRecord>> {
        let Some(bytes) = storage::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed feedback line");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let tmp = TempDir::new().unwrap();
        let log = FeedbackLog::new(tmp.path().join("feedback").join("feedback_log.jsonl"));
        assert!(log.read_all().unwrap().is_empty());

        log.record("q1", "a1", Vote::Positive).unwrap();
        log.record("q2", "a2", Vote::Negative).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].question, "q1");
        assert_eq!(records[1].vote, Vote::Negative);

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"vote\":\"positive\""));
    }
}
