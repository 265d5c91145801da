//! The engine's three public operations: `execute`, `resolve` and
//! `list_devices`.
//!
//! `execute` consults the capability registry before any I/O, raises
//! `NeedsApproval` for write capabilities, and reports transport-level
//! failures without retrying; retries belong to callers.

use crate::audit::{AuditEntry, AuditSink};
use crate::capability::CapabilityRegistry;
use crate::config::{ExecutionSettings, Settings};
use crate::error::{OlavError, Result};
use crate::fleet::credentials::CredentialProvider;
use crate::fleet::device::{Device, DeviceSelector};
use crate::fleet::inventory::InventoryProvider;
use crate::fleet::parser::TemplateParser;
use crate::fleet::pool::ConnectionPool;
use crate::fleet::result::{ExecutionResult, ResolvedScope};
use crate::fleet::transport::{DeviceTransport, Operation};
use crate::tokens;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Fingerprint of one `(device, operation)` execution, used by the
/// approval gate.
pub fn execution_fingerprint(device: &str, op: &Operation) -> String {
    crate::hash::fingerprint(device, &op.as_line())
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Per-command timeout; clamped to the configured maximum.
    pub timeout: Option<Duration>,
    /// Attempt template parsing when a template exists.
    pub parse: bool,
    /// Override the platform tag from the inventory.
    pub platform_override: Option<String>,
    /// Fingerprint already approved on the owning thread; unlocks a single
    /// matching write execution.
    pub approval: Option<String>,
    /// Owning thread, for audit attribution.
    pub thread_id: Option<String>,
}

impl ExecuteOptions {
    pub fn parsed() -> Self {
        Self {
            parse: true,
            ..Self::default()
        }
    }
}

pub struct FleetEngine {
    registry: Arc<CapabilityRegistry>,
    inventory: Arc<dyn InventoryProvider>,
    parser: Arc<dyn TemplateParser>,
    audit: Arc<dyn AuditSink>,
    pool: ConnectionPool,
    execution: ExecutionSettings,
    sessions: Arc<Semaphore>,
}

impl FleetEngine {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        inventory: Arc<dyn InventoryProvider>,
        transport: Arc<dyn DeviceTransport>,
        credentials: Arc<dyn CredentialProvider>,
        parser: Arc<dyn TemplateParser>,
        audit: Arc<dyn AuditSink>,
        settings: &Settings,
    ) -> Self {
        let execution = settings.execution.clone();
        Self {
            registry,
            inventory,
            parser,
            audit,
            pool: ConnectionPool::new(
                transport,
                credentials,
                execution.connect_timeout(),
                execution.idle_close(),
            ),
            sessions: Arc::new(Semaphore::new(execution.max_sessions)),
            execution,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn open_connections(&self) -> usize {
        self.pool.open_count()
    }

    pub async fn sweep_idle(&self) {
        self.pool.sweep_idle().await;
    }

    /// Force a device's connection out of the pool (cancellation path).
    pub async fn mark_dead(&self, device: &str) {
        self.pool.mark_dead(device).await;
    }

    /// Execute one whitelisted operation against one device.
    pub async fn execute(
        &self,
        device_name: &str,
        op: Operation,
        opts: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let device = self
            .inventory
            .get(device_name)
            .await?
            .ok_or_else(|| OlavError::not_found(format!("device '{device_name}'")))?;
        let platform = opts
            .platform_override
            .clone()
            .unwrap_or_else(|| device.platform.clone());

        // Gate before any I/O; unknown operations fail closed.
        let capability = match &op {
            Operation::Command { command } => self.registry.match_command(&platform, command),
            Operation::Api { method, path, .. } => self.registry.match_api(&platform, method, path),
        };
        let capability = match capability {
            Ok(cap) => cap,
            Err(err) => {
                self.audit_outcome(&device, &op, &opts, 0, 0, Some(&err)).await;
                return Err(err);
            }
        };

        if capability.is_write {
            let fingerprint = execution_fingerprint(&device.name, &op);
            if opts.approval.as_deref() != Some(fingerprint.as_str()) {
                // Protocol state, not a failure: the session layer turns
                // this into an interrupt. The device is not contacted.
                return Err(OlavError::NeedsApproval {
                    tool: format!("{} on {}", op.as_line(), device.name),
                    fingerprint,
                });
            }
        }

        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| OlavError::internal("session limiter closed"))?;

        let timeout = self.execution.clamp_timeout(opts.timeout);
        let started = Instant::now();
        let raw = match self.pool.send(&device, &op, timeout).await {
            Ok(raw) => raw,
            Err(err) => {
                self.audit_outcome(&device, &op, &opts, started.elapsed().as_millis() as u64, 0, Some(&err))
                    .await;
                return Err(err);
            }
        };
        let duration = started.elapsed();

        let tokens_raw = tokens::estimate(&raw);
        let mut parsed = None;
        let mut structured = false;
        let mut tokens_parsed = tokens_raw;

        let line = op.as_line();
        if opts.parse && self.parser.has_template(&platform, &line) {
            match self.parser.parse(&platform, &line, &raw) {
                Ok(rows) => {
                    tokens_parsed = tokens::estimate(&serde_json::to_string(&rows)?);
                    parsed = Some(rows);
                    structured = true;
                }
                Err(err) if self.execution.parse_fallback => {
                    log::warn!("template parse failed for '{line}' on {}: {err}", device.name);
                }
                Err(err) => {
                    let err = OlavError::ParseFailed {
                        operation: line,
                        reason: err.to_string(),
                    };
                    self.audit_outcome(
                        &device,
                        &op,
                        &opts,
                        duration.as_millis() as u64,
                        raw.len() as u64,
                        Some(&err),
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        self.audit_outcome(&device, &op, &opts, duration.as_millis() as u64, raw.len() as u64, None)
            .await;

        Ok(ExecutionResult {
            device: device.name,
            pattern_matched: capability.pattern.clone(),
            tokens_saved: if structured {
                tokens_raw.saturating_sub(tokens_parsed)
            } else {
                0
            },
            raw,
            parsed,
            structured,
            tokens_raw,
            tokens_parsed,
            duration,
        })
    }

    /// Resolve a selector against the inventory. Missing names are
    /// reported, not fatal; an entirely empty result is `EmptyScope`.
    pub async fn resolve(&self, selector: &DeviceSelector) -> Result<ResolvedScope> {
        let mut scope = ResolvedScope::default();
        match selector.requested_names() {
            Some(names) => {
                for name in names {
                    match self.inventory.get(name).await? {
                        Some(device) => scope.resolved.push(device),
                        None => scope.missing.push(name.to_string()),
                    }
                }
            }
            None => scope.resolved = self.inventory.query(selector).await?,
        }
        if scope.resolved.is_empty() && scope.missing.is_empty() {
            return Err(OlavError::EmptyScope(selector.to_string()));
        }
        Ok(scope)
    }

    /// Read-through device listing with the selector grammar.
    pub async fn list_devices(&self, filter: Option<&DeviceSelector>) -> Result<Vec<Device>> {
        self.inventory
            .query(filter.unwrap_or(&DeviceSelector::All))
            .await
    }

    async fn audit_outcome(
        &self,
        device: &Device,
        op: &Operation,
        opts: &ExecuteOptions,
        duration_ms: u64,
        bytes: u64,
        error: Option<&OlavError>,
    ) {
        let mut entry = AuditEntry::now(op.as_line());
        entry.thread_id = opts.thread_id.clone();
        entry.device = Some(device.name.clone());
        entry.duration_ms = duration_ms;
        entry.bytes = bytes;
        entry.success = error.is_none();
        entry.error = error.map(|e| format!("{}: {e}", e.kind().as_str()));
        self.audit.record(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::error::ErrorKind;
    use crate::fleet::credentials::{Credentials, StaticCredentials};
    use crate::fleet::device::test_device;
    use crate::fleet::parser::{NoTemplates, ParsedRow};
    use crate::fleet::replay::ReplayTransport;
    use crate::fleet::StaticInventory;
    use tempfile::TempDir;

    struct InterfaceTemplates;

    impl TemplateParser for InterfaceTemplates {
        fn has_template(&self, platform: &str, operation: &str) -> bool {
            platform == "cisco_ios" && operation.starts_with("show interfaces")
        }

        fn parse(&self, _platform: &str, _operation: &str, raw: &str) -> Result<Vec<ParsedRow>> {
            if raw.contains("garbage") {
                return Err(OlavError::ParseFailed {
                    operation: "show interfaces status".into(),
                    reason: "unexpected banner".into(),
                });
            }
            let mut row = ParsedRow::new();
            row.insert("interface".into(), "Gi0/1".into());
            row.insert("status".into(), "connected".into());
            Ok(vec![row])
        }
    }

    struct Harness {
        _dir: TempDir,
        transport: Arc<ReplayTransport>,
        engine: FleetEngine,
    }

    fn harness(transport: ReplayTransport, parser: Arc<dyn TemplateParser>) -> Harness {
        let dir = TempDir::new().unwrap();
        let commands_dir = dir.path().join("commands");
        std::fs::create_dir_all(&commands_dir).unwrap();
        std::fs::write(
            commands_dir.join("cisco_ios.txt"),
            "show version\nshow interface*\n!configure terminal\n",
        )
        .unwrap();
        let registry = Arc::new(CapabilityRegistry::new(
            commands_dir,
            dir.path().join("apis"),
        ));
        registry.reload().unwrap();

        let inventory = Arc::new(StaticInventory::new(vec![
            test_device("R1", "cisco_ios", &["core"]),
            test_device("R2", "cisco_ios", &["core"]),
        ]));
        let credentials = Arc::new(StaticCredentials::default().with(
            "lab",
            Credentials {
                username: "ops".into(),
                password: Some("ops".into()),
                private_key: None,
            },
        ));
        let transport = Arc::new(transport);
        let engine = FleetEngine::new(
            registry,
            inventory,
            Arc::clone(&transport) as Arc<dyn DeviceTransport>,
            credentials,
            parser,
            Arc::new(NullAuditSink),
            &Settings::default(),
        );
        Harness {
            _dir: dir,
            transport,
            engine,
        }
    }

    #[tokio::test]
    async fn whitelisted_read_touches_the_device_once() {
        let h = harness(
            ReplayTransport::new().respond("R1", "show interfaces status", "Gi0/1 connected"),
            Arc::new(InterfaceTemplates),
        );
        let result = h
            .engine
            .execute(
                "R1",
                Operation::command("show interfaces status"),
                ExecuteOptions::parsed(),
            )
            .await
            .unwrap();

        assert_eq!(result.pattern_matched, "show interface*");
        assert!(result.structured);
        assert_eq!(result.parsed.as_ref().unwrap().len(), 1);
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_operation_is_denied_before_io() {
        let h = harness(ReplayTransport::new().respond_default("ok"), Arc::new(NoTemplates));
        let err = h
            .engine
            .execute(
                "R1",
                Operation::command("erase startup-config"),
                ExecuteOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotPermitted);
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.transport.opened("R1"), 0);
    }

    #[tokio::test]
    async fn write_capability_needs_approval() {
        let h = harness(ReplayTransport::new().respond_default("ok"), Arc::new(NoTemplates));
        let op = Operation::command("configure terminal");

        let err = h
            .engine
            .execute("R1", op.clone(), ExecuteOptions::default())
            .await
            .unwrap_err();
        let OlavError::NeedsApproval { fingerprint, .. } = &err else {
            panic!("expected NeedsApproval, got {err}");
        };
        assert!(h.transport.calls().is_empty());

        // The recorded fingerprint unlocks exactly one execution.
        let result = h
            .engine
            .execute(
                "R1",
                op.clone(),
                ExecuteOptions {
                    approval: Some(fingerprint.clone()),
                    ..ExecuteOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(!result.structured);
        assert_eq!(h.transport.calls().len(), 1);

        // An approval for a different device does not transfer.
        let err = h
            .engine
            .execute(
                "R2",
                op,
                ExecuteOptions {
                    approval: Some(fingerprint.clone()),
                    ..ExecuteOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NeedsApproval);
    }

    #[tokio::test]
    async fn parse_failure_falls_back_to_raw() {
        let h = harness(
            ReplayTransport::new().respond("R1", "show interfaces status", "garbage banner"),
            Arc::new(InterfaceTemplates),
        );
        let result = h
            .engine
            .execute(
                "R1",
                Operation::command("show interfaces status"),
                ExecuteOptions::parsed(),
            )
            .await
            .unwrap();
        assert!(!result.structured);
        assert!(result.parsed.is_none());
        assert_eq!(result.raw, "garbage banner");
        assert_eq!(result.tokens_saved, 0);
    }

    #[tokio::test]
    async fn tokens_saved_accounts_for_parsing() {
        let long_output = "Interface status banner\n".repeat(40);
        let h = harness(
            ReplayTransport::new().respond("R1", "show interfaces status", &long_output),
            Arc::new(InterfaceTemplates),
        );
        let result = h
            .engine
            .execute(
                "R1",
                Operation::command("show interfaces status"),
                ExecuteOptions::parsed(),
            )
            .await
            .unwrap();
        assert!(result.structured);
        assert!(result.tokens_parsed < result.tokens_raw);
        assert_eq!(
            result.tokens_saved,
            result.tokens_raw - result.tokens_parsed
        );
    }

    #[tokio::test]
    async fn missing_device_is_not_found() {
        let h = harness(ReplayTransport::new(), Arc::new(NoTemplates));
        let err = h
            .engine
            .execute("R9", Operation::command("show version"), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn resolve_reports_missing_without_aborting() {
        let h = harness(ReplayTransport::new(), Arc::new(NoTemplates));
        let scope = h
            .engine
            .resolve(&DeviceSelector::parse("R1,R9,R2"))
            .await
            .unwrap();
        assert_eq!(scope.names(), vec!["R1", "R2"]);
        assert_eq!(scope.missing, vec!["R9".to_string()]);
    }

    #[tokio::test]
    async fn group_selector_resolves_members() {
        let h = harness(ReplayTransport::new(), Arc::new(NoTemplates));
        let scope = h
            .engine
            .resolve(&DeviceSelector::parse("group:core"))
            .await
            .unwrap();
        assert_eq!(scope.resolved.len(), 2);
        assert!(scope.missing.is_empty());
    }

    #[tokio::test]
    async fn empty_inventory_yields_empty_scope() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new(
            dir.path().join("commands"),
            dir.path().join("apis"),
        ));
        let engine = FleetEngine::new(
            registry,
            Arc::new(StaticInventory::default()),
            Arc::new(ReplayTransport::new()) as Arc<dyn DeviceTransport>,
            Arc::new(StaticCredentials::default()),
            Arc::new(NoTemplates),
            Arc::new(NullAuditSink),
            &Settings::default(),
        );
        let err = engine.resolve(&DeviceSelector::All).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyScope);
    }
}
