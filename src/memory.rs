//! Conversation memory and chat history persistence.
//!
//! History is an ordered list of [`Turn`]s; a user turn followed by the
//! assistant turn that answered it form one exchange. The most recent
//! `window` turns are fed back into the answer prompt.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Assistant => "Bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text)
    }

    fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
    window: usize,
}

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self {
            turns: Vec::new(),
            window,
        }
    }

    /// Load history from `path`; a missing file is an empty history.
    pub fn load(path: &Path, window: usize) -> Result<Self> {
        let mut memory = Self::new(window);
        if let Some(bytes) = storage::read_optional(path)? {
            match serde_json::from_slice::<Vec<Turn>>(&bytes) {
                Ok(turns) => memory.turns = turns,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable chat history")
                }
            }
        }
        Ok(memory)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.turns).map_err(|e| {
            Error::storage(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        storage::write_atomic(path, &json)
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The last `window` turns, oldest first.
    pub fn recent(&self) -> &[Turn] {
        let start = self.turns.len().saturating_sub(self.window);
        &self.turns[start..]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Question/answer pairs, in order. A trailing unanswered question is
    /// returned with `None`.
    pub fn exchanges(&self) -> Vec<(&Turn, Option<&Turn>)> {
        self.turns
            .chunks(2)
            .map(|pair| (&pair[0], pair.get(1)))
            .collect()
    }

    /// The most recent complete question/answer pair.
    pub fn last_exchange(&self) -> Option<(&Turn, &Turn)> {
        match self.turns.as_slice() {
            [.., q, a] if q.speaker == Speaker::User && a.speaker == Speaker::Assistant => {
                Some((q, a))
            }
            _ => None,
        }
    }

    /// Delete the `index`-th exchange (0-based). Returns false if out of range.
    pub fn delete_exchange(&mut self, index: usize) -> bool {
        let start = index * 2;
        if start >= self.turns.len() {
            return false;
        }
        let end = (start + 2).min(self.turns.len());
        self.turns.drain(start..end);
        true
    }

    /// Drop turns past `len`.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Write the full history to `dir/chat_log_<YYYYmmdd_HHMMSS>.json`.
    pub fn export(&self, dir: &Path) -> Result<PathBuf> {
        let name = format!("chat_log_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        self.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn filled(n: usize) -> ConversationMemory {
        let mut m = ConversationMemory::new(4);
        for i in 0..n {
            m.push(Turn::user(format!("q{}", i)));
            m.push(Turn::assistant(format!("a{}", i)));
        }
        m
    }

    #[test]
    fn test_recent_window() {
        let m = filled(3);
        let recent: Vec<&str> = m.recent().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(recent, vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(filled(1).recent().len(), 2);
    }

    #[test]
    fn test_delete_exchange() {
        let mut m = filled(3);
        assert!(m.delete_exchange(1));
        let texts: Vec<&str> = m.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q0", "a0", "q2", "a2"]);
        assert!(!m.delete_exchange(2));
        assert_eq!(m.last_exchange().unwrap().1.text, "a2");

        m.push(Turn::user("pending"));
        assert!(m.last_exchange().is_none());
    }

    #[test]
    fn test_save_load_and_export() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chat_history.json");
        let m = filled(2);
        m.save(&path).unwrap();

        let loaded = ConversationMemory::load(&path, 4).unwrap();
        assert_eq!(loaded.turns(), m.turns());
        assert_eq!(loaded.turns()[0].speaker, Speaker::User);

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw[1]["speaker"], "assistant");

        let exported = m.export(tmp.path()).unwrap();
        let name = exported.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("chat_log_") && name.ends_with(".json"));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let tmp = TempDir::new().unwrap();
        let m = ConversationMemory::load(&tmp.path().join("none.json"), 6).unwrap();
        assert!(m.is_empty());
    }
}
