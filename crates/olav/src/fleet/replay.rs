//! Scripted in-memory transport.
//!
//! Real SSH/NETCONF clients are wired by the embedding process; this
//! transport replays canned responses so skills and whitelists can be
//! exercised without touching a device. The test suite is built on it and
//! the CLI can select it for dry runs.

use crate::error::{OlavError, Result};
use crate::fleet::credentials::Credentials;
use crate::fleet::device::Device;
use crate::fleet::transport::{DeviceTransport, Operation, TransportSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ReplayState {
    /// Canned output keyed by `(device, operation line)`.
    responses: HashMap<(String, String), String>,
    default_response: Option<String>,
    /// Operations that fail with a transport error exactly once.
    fail_once: HashSet<(String, String)>,
    unreachable: HashSet<String>,
    bad_auth: HashSet<String>,
    delay: Option<Duration>,
    opened: HashMap<String, usize>,
    calls: Vec<(String, String)>,
}

/// Builder-style scripted transport; cheap to clone via `Arc`.
#[derive(Default)]
pub struct ReplayTransport {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned output for one `(device, operation)` pair.
    pub fn respond(self, device: &str, operation: &str, output: &str) -> Self {
        self.state.lock().responses.insert(
            (device.to_string(), operation.trim().to_string()),
            output.to_string(),
        );
        self
    }

    /// Output for any operation without a specific script.
    pub fn respond_default(self, output: &str) -> Self {
        self.state.lock().default_response = Some(output.to_string());
        self
    }

    /// Make one `(device, operation)` fail with a transport error on its
    /// first invocation only. Used to exercise retry paths.
    pub fn fail_once(self, device: &str, operation: &str) -> Self {
        self.state
            .lock()
            .fail_once
            .insert((device.to_string(), operation.trim().to_string()));
        self
    }

    /// Every open to this device fails with a transport error.
    pub fn unreachable(self, device: &str) -> Self {
        self.state.lock().unreachable.insert(device.to_string());
        self
    }

    /// Every open to this device fails authentication.
    pub fn reject_auth(self, device: &str) -> Self {
        self.state.lock().bad_auth.insert(device.to_string());
        self
    }

    /// Artificial per-send delay, for timeout tests.
    pub fn delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    /// How many sessions were opened to a device.
    pub fn opened(&self, device: &str) -> usize {
        self.state.lock().opened.get(device).copied().unwrap_or(0)
    }

    /// Every `(device, operation)` sent, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().calls.clone()
    }
}

struct ReplaySession {
    device: String,
    state: Arc<Mutex<ReplayState>>,
}

#[async_trait]
impl TransportSession for ReplaySession {
    async fn send(&mut self, op: &Operation, _timeout: Duration) -> Result<String> {
        let line = op.as_line();
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.calls.push((self.device.clone(), line.clone()));

        let key = (self.device.clone(), line.clone());
        if state.fail_once.remove(&key) {
            return Err(OlavError::Transport {
                device: self.device.clone(),
                reason: format!("scripted failure for '{line}'"),
            });
        }
        if let Some(output) = state.responses.get(&key) {
            return Ok(output.clone());
        }
        if let Some(output) = &state.default_response {
            return Ok(output.clone());
        }
        Err(OlavError::Transport {
            device: self.device.clone(),
            reason: format!("no scripted response for '{line}'"),
        })
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl DeviceTransport for ReplayTransport {
    async fn open(
        &self,
        device: &Device,
        _credentials: &Credentials,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn TransportSession>> {
        let mut state = self.state.lock();
        if state.unreachable.contains(&device.name) {
            return Err(OlavError::Transport {
                device: device.name.clone(),
                reason: "connection refused".into(),
            });
        }
        if state.bad_auth.contains(&device.name) {
            return Err(OlavError::Auth {
                device: device.name.clone(),
                reason: "credentials rejected".into(),
            });
        }
        *state.opened.entry(device.name.clone()).or_insert(0) += 1;
        Ok(Box::new(ReplaySession {
            device: device.name.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}
