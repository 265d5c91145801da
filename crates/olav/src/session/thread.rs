//! Thread domain entities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "system" => Role::System,
            _ => Role::Operator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Idle,
    Running,
    ToolExec,
    Interrupted,
    Cancelled,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::Idle => "idle",
            ThreadState::Running => "running",
            ThreadState::ToolExec => "tool_exec",
            ThreadState::Interrupted => "interrupted",
            ThreadState::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => ThreadState::Running,
            "tool_exec" => ThreadState::ToolExec,
            "interrupted" => ThreadState::Interrupted,
            "cancelled" => ThreadState::Cancelled,
            _ => ThreadState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// The pending call recorded while a thread waits for human approval.
/// Resume re-invokes exactly this call; the fingerprint deduplicates
/// client retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub fingerprint: String,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub client_id: String,
    pub state: ThreadState,
    pub messages: Vec<Message>,
    pub pending_interrupt: Option<Interrupt>,
    /// The most recently resolved interrupt, kept so a retried resume can
    /// be answered idempotently.
    pub last_interrupt: Option<Interrupt>,
    /// Fingerprints whose underlying call has already executed.
    pub executed_fingerprints: BTreeSet<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Thread {
    pub fn new(client_id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            thread_id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            state: ThreadState::Idle,
            messages: Vec::new(),
            pending_interrupt: None,
            last_interrupt: None,
            executed_fingerprints: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Stable fingerprint of a `(tool, arguments)` pair. Object keys are
/// sorted so semantically equal argument maps hash identically.
pub fn tool_fingerprint(tool: &str, arguments: &serde_json::Value) -> String {
    crate::hash::fingerprint(tool, &canonical_json(arguments))
}

fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}
