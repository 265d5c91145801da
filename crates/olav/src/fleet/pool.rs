//! Per-device connection pool.
//!
//! Lifecycle per device:
//!
//! ```text
//! Disconnected --open--> Connecting --auth--> Ready --send--> Awaiting
//!     ^                      | fail            |                | reply
//!     |                      v                 |                v
//!     +--------- Dead <------+                 +--------- Ready
//! ```
//!
//! A slot holds at most one live session and a `tokio::sync::Mutex`
//! serializes commands on it, so the CLI channel never sees interleaved
//! requests. Any failure while Awaiting marks the slot Dead; the next
//! `send` rebuilds it. Idle Ready sessions are closed after the configured
//! idle window.

use crate::error::{OlavError, Result};
use crate::fleet::credentials::CredentialProvider;
use crate::fleet::device::Device;
use crate::fleet::transport::{DeviceTransport, Operation, TransportSession};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Credential reference used when a device does not carry one.
const DEFAULT_CREDENTIALS_REF: &str = "default";

struct Live {
    session: Box<dyn TransportSession>,
    last_used: Instant,
}

#[derive(Default)]
struct Slot {
    live: tokio::sync::Mutex<Option<Live>>,
    /// Set by `mark_dead` while a send is in flight; the session is
    /// discarded as soon as the holder releases the lock.
    poisoned: AtomicBool,
}

pub struct ConnectionPool {
    transport: Arc<dyn DeviceTransport>,
    credentials: Arc<dyn CredentialProvider>,
    connect_timeout: Duration,
    idle_close: Duration,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl ConnectionPool {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        credentials: Arc<dyn CredentialProvider>,
        connect_timeout: Duration,
        idle_close: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            connect_timeout,
            idle_close,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, device: &str) -> Arc<Slot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(device.to_string())
                .or_insert_with(|| Arc::new(Slot::default())),
        )
    }

    /// Send one operation, opening or rebuilding the session as needed.
    /// Commands to the same device are serialized; distinct devices are
    /// independent.
    pub async fn send(&self, device: &Device, op: &Operation, timeout: Duration) -> Result<String> {
        let slot = self.slot(&device.name);
        let mut guard = slot.live.lock().await;

        if slot.poisoned.swap(false, Ordering::SeqCst) {
            drop_session(&mut guard).await;
        }

        // Close a session that outlived the idle window rather than trust
        // a channel the device may already have torn down.
        if guard
            .as_ref()
            .is_some_and(|live| live.last_used.elapsed() > self.idle_close)
        {
            drop_session(&mut guard).await;
        }

        if guard.is_none() {
            let reference = device
                .credentials_ref
                .as_deref()
                .unwrap_or(DEFAULT_CREDENTIALS_REF);
            let credentials = self.credentials.lookup(reference).await?;
            let session = tokio::time::timeout(
                self.connect_timeout,
                self.transport
                    .open(device, &credentials, self.connect_timeout),
            )
            .await
            .map_err(|_| OlavError::Timeout {
                what: format!("connect to {}", device.name),
                after: self.connect_timeout,
            })??;
            *guard = Some(Live {
                session,
                last_used: Instant::now(),
            });
        }

        let live = guard.as_mut().expect("session opened above");
        let outcome = tokio::time::timeout(timeout, live.session.send(op, timeout)).await;

        match outcome {
            Ok(Ok(raw)) => {
                live.last_used = Instant::now();
                Ok(raw)
            }
            Ok(Err(err)) => {
                // Awaiting -> Dead; rebuilt on the next send.
                *guard = None;
                Err(err)
            }
            Err(_) => {
                // The session may be wedged mid-reply; force-release it
                // without waiting on a close handshake.
                *guard = None;
                Err(OlavError::Timeout {
                    what: format!("{} on {}", op.as_line(), device.name),
                    after: timeout,
                })
            }
        }
    }

    /// Mark a device's connection Dead. Takes effect immediately when the
    /// slot is free, otherwise as soon as the in-flight command releases
    /// it. Used by cancellation after the grace period.
    pub async fn mark_dead(&self, device: &str) {
        let slot = self.slot(device);
        match slot.live.try_lock() {
            Ok(mut guard) => drop_session(&mut guard).await,
            Err(_) => slot.poisoned.store(true, Ordering::SeqCst),
        };
    }

    /// Close sessions that have been idle past the window. Cheap enough to
    /// run from a periodic reaper task.
    pub async fn sweep_idle(&self) {
        let slots: Vec<Arc<Slot>> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            if let Ok(mut guard) = slot.live.try_lock() {
                if guard
                    .as_ref()
                    .is_some_and(|live| live.last_used.elapsed() > self.idle_close)
                {
                    drop_session(&mut guard).await;
                }
            }
        }
    }

    /// Number of live sessions. Slots locked by an in-flight command are
    /// counted as open.
    pub fn open_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| match slot.live.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            })
            .count()
    }
}

async fn drop_session(guard: &mut Option<Live>) {
    if let Some(mut live) = guard.take() {
        live.session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::device::test_device;
    use crate::fleet::replay::ReplayTransport;
    use crate::fleet::credentials::{Credentials, StaticCredentials};

    fn lab_credentials() -> Arc<StaticCredentials> {
        Arc::new(StaticCredentials::default().with(
            "lab",
            Credentials {
                username: "ops".into(),
                password: Some("ops".into()),
                private_key: None,
            },
        ))
    }

    fn pool(transport: &Arc<ReplayTransport>) -> ConnectionPool {
        ConnectionPool::new(
            Arc::clone(transport) as Arc<dyn crate::fleet::transport::DeviceTransport>,
            lab_credentials(),
            Duration::from_secs(2),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn session_is_reused_across_sends() {
        let transport = Arc::new(
            ReplayTransport::new().respond_default("ok"),
        );
        let pool = pool(&transport);
        let device = test_device("R1", "cisco_ios", &[]);

        pool.send(&device, &Operation::command("show version"), Duration::from_secs(5))
            .await
            .unwrap();
        pool.send(&device, &Operation::command("show clock"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(transport.opened("R1"), 1);
        assert_eq!(pool.open_count(), 1);
    }

    #[tokio::test]
    async fn failed_send_kills_the_session() {
        let transport = Arc::new(
            ReplayTransport::new()
                .respond_default("ok")
                .fail_once("R1", "show tech"),
        );
        let pool = pool(&transport);
        let device = test_device("R1", "cisco_ios", &[]);

        let err = pool
            .send(&device, &Operation::command("show tech"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert_eq!(pool.open_count(), 0);

        // Next send rebuilds the connection.
        pool.send(&device, &Operation::command("show clock"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(transport.opened("R1"), 2);
    }

    #[tokio::test]
    async fn unreachable_device_reports_transport_error() {
        let transport = Arc::new(ReplayTransport::new().unreachable("R3"));
        let pool = pool(&transport);
        let device = test_device("R3", "cisco_ios", &[]);

        let err = pool
            .send(&device, &Operation::command("show version"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn timeout_forces_a_single_connection_close() {
        let transport = Arc::new(
            ReplayTransport::new()
                .respond_default("ok")
                .delay(Duration::from_millis(200)),
        );
        let pool = pool(&transport);
        let device = test_device("R1", "cisco_ios", &[]);

        let err = pool
            .send(
                &device,
                &Operation::command("show tech"),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
        assert_eq!(pool.open_count(), 0, "wedged session force-released");

        // The pool rebuilds on the next send rather than reusing the dead
        // channel.
        pool.send(&device, &Operation::command("show clock"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(transport.opened("R1"), 2);
    }

    #[tokio::test]
    async fn mark_dead_closes_an_idle_session() {
        let transport = Arc::new(ReplayTransport::new().respond_default("ok"));
        let pool = pool(&transport);
        let device = test_device("R1", "cisco_ios", &[]);

        pool.send(&device, &Operation::command("show version"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(pool.open_count(), 1);

        pool.mark_dead("R1").await;
        assert_eq!(pool.open_count(), 0);
    }
}
