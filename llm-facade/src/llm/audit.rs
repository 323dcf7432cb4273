//! Per-call audit records written as JSON files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{ChatMessage, Usage};
use crate::error::Result;

/// Exact input, output and cost of one chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub model: String,
    pub input: Vec<ChatMessage>,
    /// Raw provider payload, or `{"error": ...}` for failed calls
    pub output: Value,
    pub usage: Value,
    pub response_time: f64,
}

impl AuditRecord {
    pub fn new(
        session_id: impl Into<String>,
        model: impl Into<String>,
        input: Vec<ChatMessage>,
        output: Value,
        usage: &Usage,
        response_time: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            model: model.into(),
            input,
            output,
            usage: usage.cost_breakdown(),
            response_time,
        }
    }
}

/// Writes one file per record under a session-specific name.
#[derive(Debug)]
pub struct AuditLog {
    dir: PathBuf,
    session_id: String,
    seq: AtomicU64,
}

impl AuditLog {
    /// Open the log, creating `dir` if absent.
    pub fn create(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            session_id: session_id.into(),
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a record to `<session>_<unix secs>_<seq>.json`.
    pub fn write(&self, record: &AuditRecord) -> Result<PathBuf> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!(
            "{}_{}_{:04}.json",
            self.session_id,
            record.timestamp.timestamp(),
            seq
        ));
        fs::write(&path, serde_json::to_string_pretty(record)?)?;
        tracing::debug!(path = %path.display(), "Wrote audit record");
        Ok(path)
    }

    /// All records written to this directory for the session, oldest first.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        let prefix = format!("{}_", self.session_id);
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "json")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        paths.sort_by_key(|p| sequence_of(p));

        paths
            .iter()
            .map(|p| Ok(serde_json::from_str(&fs::read_to_string(p)?)?))
            .collect()
    }
}

fn sequence_of(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_creates_directory_and_writes_record() {
        let dir = tempdir().expect("tempdir should be created");
        let log_dir = dir.path().join("logs").join("llm");
        let log = AuditLog::create(&log_dir, "20240101_120000_abcd1234").unwrap();
        assert!(log_dir.is_dir());

        let usage = Usage::empty("gpt-4");
        let record = AuditRecord::new(
            "20240101_120000_abcd1234",
            "gpt-4",
            vec![ChatMessage::user("hi")],
            json!({"error": "boom"}),
            &usage,
            0.25,
        );
        let path = log.write(&record).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("20240101_120000_abcd1234_"));
        assert!(name.ends_with("_0000.json"));

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for field in [
            "timestamp",
            "session_id",
            "model",
            "input",
            "output",
            "usage",
            "response_time",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(value["output"]["error"], "boom");
        assert_eq!(value["input"][0]["role"], "user");
    }

    #[test]
    fn test_read_all_in_write_order() {
        let dir = tempdir().unwrap();
        let log = AuditLog::create(dir.path(), "s").unwrap();
        for i in 0..3 {
            let record = AuditRecord::new(
                "s",
                "gpt-4",
                vec![],
                json!({ "n": i }),
                &Usage::empty("gpt-4"),
                0.0,
            );
            log.write(&record).unwrap();
        }
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].output["n"], 2);
    }
}
