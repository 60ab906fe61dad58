use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, SeedxError};

/// One completed translation.
///
/// Field names are the on-disk format: a JSON array of these objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Truncated input shown in listings
    pub input: String,
    /// Truncated output shown in listings
    pub output: String,
    pub full_input: String,
    pub full_output: String,
}

impl HistoryEntry {
    pub fn new(
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        full_input: impl Into<String>,
        full_output: impl Into<String>,
        preview_chars: usize,
    ) -> Self {
        let full_input = full_input.into();
        let full_output = full_output.into();
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            input: preview(&full_input, preview_chars),
            output: preview(&full_output, preview_chars),
            full_input,
            full_output,
        }
    }
}

/// First `chars` characters followed by "...", also when the text is shorter.
pub fn preview(text: &str, chars: usize) -> String {
    let head: String = text.chars().take(chars).collect();
    format!("{}...", head)
}

/// Insertion-ordered history that drops its oldest entries past `cap`.
#[derive(Debug, Clone)]
pub struct TranslationHistory {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
}

impl TranslationHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning whatever was evicted to stay within the cap.
    pub fn push(&mut self, entry: HistoryEntry) -> Vec<HistoryEntry> {
        self.entries.push_back(entry);
        self.enforce_cap()
    }

    fn enforce_cap(&mut self) -> Vec<HistoryEntry> {
        let excess = self.entries.len().saturating_sub(self.cap);
        let evicted: Vec<HistoryEntry> = self.entries.drain(..excess).collect();
        if !evicted.is_empty() {
            debug!("Evicted {} history entries (cap {})", evicted.len(), self.cap);
        }
        evicted
    }

    /// Snapshot, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace everything; a list longer than the cap keeps its newest entries.
    pub fn replace(&mut self, entries: Vec<HistoryEntry>) {
        self.entries = entries.into();
        self.enforce_cap();
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let entries: Vec<&HistoryEntry> = self.entries.iter().collect();
        let content = serde_json::to_string_pretty(&entries)?;
        std::fs::write(path, content)
            .map_err(|e| SeedxError::History(format!("Failed to write {}: {}", path.display(), e)))?;
        info!("Saved {} history entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Read a history file. Nothing is mutated here, so a bad file leaves the
    /// caller's history untouched.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<HistoryEntry>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SeedxError::History(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SeedxError::History(format!("Malformed history file {}: {}", path.display(), e)))
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let entries = Self::read(&path)?;
        info!("Loaded {} history entries from {}", entries.len(), path.as_ref().display());
        self.replace(entries);
        Ok(())
    }
}

impl Default for TranslationHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry::new("English", "Polish", format!("input {}", n), format!("output {}", n), 50)
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 50), "short...");
        assert_eq!(preview("", 50), "...");
        assert_eq!(preview(&"a".repeat(60), 50), format!("{}...", "a".repeat(50)));
        assert_eq!(preview("zażółć gęślą", 6), "zażółć...");
    }

    #[test]
    fn test_entry_fields() {
        let entry = HistoryEntry::new("English", "German", "x".repeat(80), "Hallo", 50);
        assert_eq!(entry.input.chars().count(), 53);
        assert_eq!(entry.output, "Hallo...");
        assert_eq!(entry.full_output, "Hallo");
        assert_eq!(entry.full_input.len(), 80);
        assert_eq!(entry.timestamp.len(), 8);
        assert_eq!(entry.timestamp.matches(':').count(), 2);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut history = TranslationHistory::new(3);
        for n in 0..3 {
            assert!(history.push(entry(n)).is_empty());
        }

        let evicted = history.push(entry(3));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].full_input, "input 0");
        let inputs: Vec<String> = history.entries().into_iter().map(|e| e.full_input).collect();
        assert_eq!(inputs, vec!["input 1", "input 2", "input 3"]);
    }

    #[test]
    fn test_replace_truncates_to_newest() {
        let mut history = TranslationHistory::new(2);
        history.replace((0..5).map(entry).collect());
        let inputs: Vec<String> = history.entries().into_iter().map(|e| e.full_input).collect();
        assert_eq!(inputs, vec!["input 3", "input 4"]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut history = TranslationHistory::new(10);
        for n in 0..4 {
            history.push(entry(n));
        }
        history.save(&path).unwrap();

        let mut restored = TranslationHistory::new(10);
        restored.push(entry(99));
        restored.load(&path).unwrap();
        assert_eq!(restored.entries(), history.entries());
    }

    #[test]
    fn test_file_format_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = TranslationHistory::new(10);
        history.push(entry(1));
        history.save(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let object = value.as_array().unwrap()[0].as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["full_input", "full_output", "input", "output", "source_lang", "target_lang", "timestamp"]
        );
    }

    #[test]
    fn test_malformed_file_leaves_history_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, r#"[{"timestamp": "10:00:00"}"#).unwrap();

        let mut history = TranslationHistory::new(10);
        history.push(entry(1));
        let before = history.entries();

        let err = history.load(&path).unwrap_err();
        assert!(matches!(err, SeedxError::History(_)));
        assert_eq!(history.entries(), before);
    }
}
