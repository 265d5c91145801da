//! Thread persistence seam.

use crate::error::{OlavError, Result};
use crate::session::thread::{Thread, ThreadState};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub client_id: String,
    pub state: ThreadState,
    pub message_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Durable thread storage. Every save must be flushed before it returns;
/// a crash after acknowledgment leaves the thread resumable.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create(&self, thread: &Thread) -> Result<()>;

    /// Persist the full thread state (messages are append-only, so stores
    /// may write only the tail).
    async fn save(&self, thread: &Thread) -> Result<()>;

    async fn load(&self, thread_id: &str) -> Result<Option<Thread>>;

    async fn list(&self) -> Result<Vec<ThreadSummary>>;

    async fn delete(&self, thread_id: &str) -> Result<()>;
}

/// In-memory store for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<String, Thread>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn create(&self, thread: &Thread) -> Result<()> {
        self.threads
            .write()
            .insert(thread.thread_id.clone(), thread.clone());
        Ok(())
    }

    async fn save(&self, thread: &Thread) -> Result<()> {
        self.threads
            .write()
            .insert(thread.thread_id.clone(), thread.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Thread>> {
        Ok(self.threads.read().get(thread_id).cloned())
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>> {
        let mut summaries: Vec<ThreadSummary> = self
            .threads
            .read()
            .values()
            .map(|t| ThreadSummary {
                thread_id: t.thread_id.clone(),
                client_id: t.client_id.clone(),
                state: t.state,
                message_count: t.messages.len(),
                updated_at: t.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.threads
            .write()
            .remove(thread_id)
            .map(|_| ())
            .ok_or_else(|| OlavError::not_found(format!("thread '{thread_id}'")))
    }
}
