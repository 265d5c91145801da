//! Append-only audit stream.
//!
//! Every device execution (including denials) emits one [`AuditEntry`].
//! The stream is never queried in the hot path; sinks are fire-and-forget
//! with a bounded queue so a slow disk cannot stall executions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use time::OffsetDateTime;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub thread_id: Option<String>,
    pub device: Option<String>,
    pub operation: String,
    pub success: bool,
    pub duration_ms: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn now(operation: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            thread_id: None,
            device: None,
            operation: operation.into(),
            success: true,
            duration_ms: 0,
            bytes: 0,
            error: None,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an entry. Sinks must not fail the caller; delivery problems
    /// are logged and dropped.
    async fn record(&self, entry: AuditEntry);
}

/// Sink that discards everything. Used by tests and embedders that wire
/// their own log pipeline.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _entry: AuditEntry) {}
}

/// JSON-lines file sink, one entry per line, fed through a bounded channel
/// to a blocking writer task.
pub struct JsonlAuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl JsonlAuditSink {
    pub fn spawn(path: PathBuf, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(queue_depth.max(1));
        tokio::task::spawn_blocking(move || {
            let mut file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(f) => f,
                Err(e) => {
                    log::error!("audit sink disabled, cannot open {}: {e}", path.display());
                    // Drain so producers never block on a dead sink.
                    while rx.blocking_recv().is_some() {}
                    return;
                }
            };
            while let Some(entry) = rx.blocking_recv() {
                match serde_json::to_string(&entry) {
                    Ok(line) => {
                        if let Err(e) = writeln!(file, "{line}") {
                            log::warn!("audit write failed: {e}");
                        }
                    }
                    Err(e) => log::warn!("audit entry not serializable: {e}"),
                }
            }
        });
        Self { tx }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: AuditEntry) {
        // Bounded queue: producers wait rather than buffering unboundedly.
        if self.tx.send(entry).await.is_err() {
            log::warn!("audit writer task gone, entry dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::spawn(path.clone(), 8);

        let mut entry = AuditEntry::now("show version");
        entry.device = Some("R1".into());
        sink.record(entry.clone()).await;
        entry.success = false;
        entry.error = Some("not permitted".into());
        sink.record(entry).await;

        // Let the writer task flush.
        drop(sink);
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if path.exists() {
                let text = std::fs::read_to_string(&path).unwrap();
                if text.lines().count() == 2 {
                    assert!(text.lines().all(|l| l.contains("show version")));
                    return;
                }
            }
        }
        panic!("audit lines never appeared");
    }
}
