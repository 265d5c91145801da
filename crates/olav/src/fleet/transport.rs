//! Device transport seam.
//!
//! SSH/CLI and NETCONF clients live outside the core. The engine only
//! requires `open -> send -> close` with per-call timeouts; sessions are
//! serialized per device by the connection pool so implementations never
//! see interleaved commands on one channel.

use crate::error::{OlavError, Result};
use crate::fleet::credentials::Credentials;
use crate::fleet::device::Device;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One request against a device or system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Operation {
    Command { command: String },
    Api {
        method: String,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
}

impl Operation {
    pub fn command(command: impl Into<String>) -> Self {
        Operation::Command {
            command: command.into(),
        }
    }

    pub fn api(method: impl Into<String>, path: impl Into<String>) -> Self {
        Operation::Api {
            method: method.into(),
            path: path.into(),
            body: None,
        }
    }

    /// Canonical single-line form, used for fingerprints, audit entries
    /// and template lookup.
    pub fn as_line(&self) -> String {
        match self {
            Operation::Command { command } => command.trim().to_string(),
            Operation::Api { method, path, .. } => {
                format!("{} {}", method.to_ascii_uppercase(), path)
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_line())
    }
}

/// An authenticated session. `send` resolves with the raw textual reply.
#[async_trait]
pub trait TransportSession: Send {
    async fn send(&mut self, op: &Operation, timeout: Duration) -> Result<String>;
    async fn close(&mut self);
}

#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Open and authenticate a session. Implementations must observe the
    /// connect timeout and distinguish `Auth` from `Transport` failures.
    async fn open(
        &self,
        device: &Device,
        credentials: &Credentials,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TransportSession>>;
}

/// Placeholder transport for deployments that have not wired an SSH or
/// NETCONF client yet; every open fails with a `Transport` error.
pub struct UnconfiguredTransport;

#[async_trait]
impl DeviceTransport for UnconfiguredTransport {
    async fn open(
        &self,
        device: &Device,
        _credentials: &Credentials,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn TransportSession>> {
        Err(OlavError::Transport {
            device: device.name.clone(),
            reason: "no device transport configured".into(),
        })
    }
}
