//! Map phase: fan a skill out over the plan's device set.
//!
//! Concurrency is bounded by a fixed worker pool fed from a bounded queue
//! (capacity `2 x concurrency`; the producer waits when it is full).
//! Cancellation is cooperative: no new tasks are scheduled, in-flight
//! devices get a grace period, and whatever is still running afterwards is
//! abandoned with its connection marked dead. A cancelled run still
//! reduces the completed devices into a partial report.

use crate::config::{InspectionSettings, Settings};
use crate::error::{ErrorKind, OlavError, Result};
use crate::fleet::{Device, ExecuteOptions, ExecutionResult, FleetEngine, Operation};
use crate::inspect::criteria::{EvalContext, Severity, worst_severity};
use crate::inspect::plan::InspectionPlan;
use crate::inspect::report::{self, DeviceSummary, InspectionReport, Tier};
use crate::knowledge::{KnowledgeStore, WriteOptions};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct InspectionRunner {
    engine: Arc<FleetEngine>,
    knowledge: Option<Arc<KnowledgeStore>>,
    settings: InspectionSettings,
    reports_dir: PathBuf,
    inspections: Arc<Semaphore>,
}

impl InspectionRunner {
    pub fn new(
        engine: Arc<FleetEngine>,
        knowledge: Option<Arc<KnowledgeStore>>,
        settings: &Settings,
    ) -> Self {
        let inspection = settings.inspection.clone();
        Self {
            engine,
            knowledge,
            reports_dir: settings.reports_dir(),
            inspections: Arc::new(Semaphore::new(inspection.max_concurrent_inspections)),
            settings: inspection,
        }
    }

    pub fn settings(&self) -> &InspectionSettings {
        &self.settings
    }

    /// Execute the map and reduce phases for a prepared plan.
    pub async fn run(
        &self,
        plan: InspectionPlan,
        cancel: CancellationToken,
        persist: bool,
    ) -> Result<InspectionReport> {
        if plan.dry_run {
            return Err(OlavError::internal(
                "dry-run plans are for display, not execution",
            ));
        }
        let _permit = self
            .inspections
            .acquire()
            .await
            .map_err(|_| OlavError::internal("inspection limiter closed"))?;

        let plan = Arc::new(plan);
        let started_at = OffsetDateTime::now_utc();
        let concurrency = self.settings.device_concurrency.max(1);

        let (task_tx, task_rx) = mpsc::channel::<Device>(concurrency * 2);
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        let (result_tx, mut result_rx) =
            mpsc::channel::<(String, DeviceSummary, u64)>(plan.devices.len().max(1));
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        // Producer: stops scheduling as soon as cancellation is requested.
        {
            let devices = plan.devices.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for device in devices {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = task_tx.send(device) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let engine = Arc::clone(&self.engine);
            let plan = Arc::clone(&plan);
            let cancel = cancel.clone();
            let backoff = self.settings.retry_backoff();
            workers.spawn(async move {
                loop {
                    let next = {
                        let mut rx = task_rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            device = rx.recv() => device,
                        }
                    };
                    let Some(device) = next else { break };
                    in_flight.lock().insert(device.name.clone());
                    let (summary, bytes) =
                        inspect_device(&engine, &plan, &device, backoff).await;
                    in_flight.lock().remove(&device.name);
                    if result_tx
                        .send((device.name.clone(), summary, bytes))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut per_device: BTreeMap<String, DeviceSummary> = BTreeMap::new();
        let mut bytes_in = 0u64;
        {
            let grace = self.settings.cancel_grace();
            let mut drained = false;
            let collect = async {
                while let Some((name, summary, bytes)) = result_rx.recv().await {
                    bytes_in += bytes;
                    per_device.insert(name, summary);
                }
            };
            tokio::pin!(collect);
            tokio::select! {
                _ = &mut collect => { drained = true; }
                _ = cancel.cancelled() => {}
            }
            if !drained {
                // Grace period for in-flight devices, then abandon them.
                let _ = tokio::time::timeout(grace, &mut collect).await;
            }
        }

        if cancel.is_cancelled() {
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            let stranded: Vec<String> = in_flight.lock().drain().collect();
            for device in stranded {
                self.engine.mark_dead(&device).await;
            }
        } else {
            while workers.join_next().await.is_some() {}
        }

        let report = report::reduce(
            &plan,
            per_device,
            started_at,
            OffsetDateTime::now_utc(),
            cancel.is_cancelled(),
            bytes_in,
        );

        if persist && !report.per_device.is_empty() {
            if let Some(store) = &self.knowledge {
                let rel = format!(
                    "knowledge/reports/{}-{}.md",
                    report.skill_id,
                    report.started_at.unix_timestamp()
                );
                if let Err(e) = store
                    .write(&rel, &report.render_markdown(), &WriteOptions::administrative())
                    .await
                {
                    log::warn!("report persistence failed: {e}");
                }
            }
        }

        Ok(report)
    }

    /// Render a report within the configured token budget, spilling the
    /// full text to the reports directory when it is too large.
    pub fn render(&self, report: &InspectionReport) -> Result<report::RenderedReport> {
        report.render_bounded(self.settings.report_token_limit, &self.reports_dir)
    }
}

/// Run one device through the skill's command sequence and summarize.
async fn inspect_device(
    engine: &Arc<FleetEngine>,
    plan: &Arc<InspectionPlan>,
    device: &Device,
    backoff: std::time::Duration,
) -> (DeviceSummary, u64) {
    let Some(steps) = plan.skill.platforms.get(&device.platform) else {
        return (
            DeviceSummary::skipped(&format!("unsupported platform '{}'", device.platform)),
            0,
        );
    };

    let budget = plan.device_timeout();
    match tokio::time::timeout(budget, run_steps(engine, plan, device, steps, backoff)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            // One forced close per timed-out device.
            engine.mark_dead(&device.name).await;
            (
                DeviceSummary::failed(
                    ErrorKind::Timeout,
                    format!("device budget of {budget:?} exceeded"),
                ),
                0,
            )
        }
    }
}

async fn run_steps(
    engine: &Arc<FleetEngine>,
    plan: &Arc<InspectionPlan>,
    device: &Device,
    steps: &[crate::inspect::skill::SkillStep],
    backoff: std::time::Duration,
) -> (DeviceSummary, u64) {
    let mut outcomes: Vec<(String, Result<ExecutionResult>)> = Vec::with_capacity(steps.len());

    // Consecutive independent steps may overlap; everything else runs in
    // declared order. The per-device session stays serialized either way.
    let mut batch: Vec<String> = Vec::new();
    for step in steps {
        let operation = plan.bind_operation(&step.operation);
        if step.independent {
            batch.push(operation);
            continue;
        }
        flush_batch(engine, device, &mut batch, &mut outcomes, backoff).await;
        let result = execute_with_retry(engine, device, &operation, backoff).await;
        outcomes.push((operation, result));
    }
    flush_batch(engine, device, &mut batch, &mut outcomes, backoff).await;

    let bytes: u64 = outcomes
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok().map(|r| r.raw.len() as u64))
        .sum();

    let mut bullets = Vec::new();
    let mut tokens_raw = 0usize;
    let mut tokens_final = 0usize;
    let mut first_error: Option<ErrorKind> = None;

    for (operation, outcome) in &outcomes {
        match outcome {
            Ok(result) => {
                tokens_raw += result.tokens_raw;
                tokens_final += result.tokens_parsed;
                if result.structured {
                    bullets.push(format!(
                        "`{operation}`: {} rows, {} tokens saved",
                        result.parsed.as_ref().map_or(0, Vec::len),
                        result.tokens_saved
                    ));
                } else {
                    bullets.push(format!(
                        "`{operation}`: raw output, {} tokens",
                        result.tokens_raw
                    ));
                }
            }
            Err(err) => {
                first_error.get_or_insert(err.kind());
                bullets.push(format!("`{operation}` failed: {err}"));
            }
        }
    }

    if let Some(kind) = first_error {
        return (
            DeviceSummary {
                tier: Tier::Fail,
                bullets,
                error_kind: Some(kind),
                tokens_raw,
                tokens_final,
            },
            bytes,
        );
    }

    // Evaluate acceptance criteria over the union of parsed rows.
    let rows: Vec<crate::fleet::ParsedRow> = outcomes
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .filter_map(|r| r.parsed.clone())
        .flatten()
        .collect();
    let raw: String = outcomes
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok().map(|r| r.raw.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    let ctx = EvalContext {
        rows: &rows,
        raw: &raw,
        params: &plan.parameters,
    };
    let (severity, matched) = worst_severity(&plan.skill.criteria, &ctx);
    for criterion in &matched {
        bullets.push(format!("criterion matched: {}", criterion.source));
    }
    let tier = match severity {
        Some(Severity::Fail) => Tier::Fail,
        Some(Severity::Warn) => Tier::Warning,
        None => Tier::Pass,
    };

    (
        DeviceSummary {
            tier,
            bullets,
            error_kind: None,
            tokens_raw,
            tokens_final,
        },
        bytes,
    )
}

async fn flush_batch(
    engine: &Arc<FleetEngine>,
    device: &Device,
    batch: &mut Vec<String>,
    outcomes: &mut Vec<(String, Result<ExecutionResult>)>,
    backoff: std::time::Duration,
) {
    if batch.is_empty() {
        return;
    }
    let operations = std::mem::take(batch);
    let futures = operations.iter().map(|operation| {
        let engine = Arc::clone(engine);
        async move { execute_with_retry(&engine, device, operation, backoff).await }
    });
    let results = futures::future::join_all(futures).await;
    for (operation, result) in operations.iter().zip(results) {
        outcomes.push((operation.clone(), result));
    }
}

/// Idempotent reads get exactly one retry after transient transport
/// trouble; everything else surfaces immediately.
async fn execute_with_retry(
    engine: &Arc<FleetEngine>,
    device: &Device,
    operation: &str,
    backoff: std::time::Duration,
) -> Result<ExecutionResult> {
    let op = to_operation(operation);
    let opts = ExecuteOptions::parsed();
    let first = engine.execute(&device.name, op.clone(), opts.clone()).await;
    match &first {
        Err(err) if matches!(err.kind(), ErrorKind::Transport | ErrorKind::Timeout) => {
            tokio::time::sleep(backoff).await;
            engine.execute(&device.name, op, opts).await
        }
        _ => first,
    }
}

/// Step lines starting with an HTTP verb are API calls; everything else
/// is a CLI command.
fn to_operation(line: &str) -> Operation {
    let mut parts = line.splitn(2, ' ');
    let head = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();
    let verbs = ["GET", "PUT", "POST", "DELETE", "PATCH", "HEAD", "OPTIONS"];
    if verbs.contains(&head.to_ascii_uppercase().as_str()) && rest.starts_with('/') {
        Operation::api(head.to_ascii_uppercase(), rest)
    } else {
        Operation::command(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::capability::CapabilityRegistry;
    use crate::fleet::credentials::{Credentials, StaticCredentials};
    use crate::fleet::replay::ReplayTransport;
    use crate::fleet::{
        DeviceSelector, DeviceTransport, ParsedRow, StaticInventory, TemplateParser,
    };
    use crate::inspect::catalog::SkillCatalog;
    use crate::inspect::plan;
    use crate::inspect::skill::EXAMPLE_SKILL;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct CounterTemplates;

    impl TemplateParser for CounterTemplates {
        fn has_template(&self, _platform: &str, operation: &str) -> bool {
            operation.starts_with("show interfaces counters")
        }

        fn parse(
            &self,
            _platform: &str,
            _operation: &str,
            raw: &str,
        ) -> crate::error::Result<Vec<ParsedRow>> {
            // One row per "iface errors" line.
            Ok(raw
                .lines()
                .filter_map(|line| {
                    let mut cols = line.split_whitespace();
                    let iface = cols.next()?;
                    let errors = cols.next()?;
                    let mut row = ParsedRow::new();
                    row.insert("interface".into(), iface.to_string());
                    row.insert("input_errors".into(), errors.to_string());
                    Some(row)
                })
                .collect())
        }
    }

    struct Rig {
        _dir: TempDir,
        catalog: SkillCatalog,
        engine: Arc<FleetEngine>,
        runner: InspectionRunner,
        transport: Arc<ReplayTransport>,
    }

    fn rig(transport: ReplayTransport, devices: Vec<crate::fleet::Device>) -> Rig {
        let dir = TempDir::new().unwrap();
        let commands_dir = dir.path().join("imports").join("commands");
        std::fs::create_dir_all(&commands_dir).unwrap();
        std::fs::write(
            commands_dir.join("cisco_ios.txt"),
            "show interface*\n",
        )
        .unwrap();
        std::fs::write(commands_dir.join("huawei_vrp.txt"), "display interface*\n").unwrap();

        let skills_dir = dir.path().join("skills");
        std::fs::create_dir_all(&skills_dir).unwrap();
        std::fs::write(skills_dir.join("interface-check.md"), EXAMPLE_SKILL).unwrap();

        let settings = crate::config::for_dir(dir.path());
        let registry = Arc::new(CapabilityRegistry::new(
            settings.commands_dir(),
            settings.apis_dir(),
        ));
        registry.reload().unwrap();
        let catalog = SkillCatalog::new(settings.skills_dir());
        catalog.reload().unwrap();

        let credentials = Arc::new(StaticCredentials::default().with(
            "lab",
            Credentials {
                username: "ops".into(),
                password: None,
                private_key: None,
            },
        ));
        let transport = Arc::new(transport);
        let engine = Arc::new(FleetEngine::new(
            registry,
            Arc::new(StaticInventory::new(devices)),
            Arc::clone(&transport) as Arc<dyn DeviceTransport>,
            credentials,
            Arc::new(CounterTemplates),
            Arc::new(NullAuditSink),
            &settings,
        ));
        let runner = InspectionRunner::new(Arc::clone(&engine), None, &settings);
        Rig {
            _dir: dir,
            catalog,
            engine,
            runner,
            transport,
        }
    }

    fn core_devices() -> Vec<crate::fleet::Device> {
        vec![
            crate::fleet::test_device("R1", "cisco_ios", &["core"]),
            crate::fleet::test_device("R2", "cisco_ios", &["core"]),
            crate::fleet::test_device("R3", "cisco_ios", &["core"]),
        ]
    }

    async fn prepared(rig: &Rig, selector: &str) -> InspectionPlan {
        plan::prepare(
            &rig.catalog,
            &rig.engine,
            "interface-check",
            DeviceSelector::parse(selector),
            BTreeMap::new(),
            false,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn fan_out_with_one_unreachable_device() {
        let transport = ReplayTransport::new()
            .respond_default("Gi0/1 0\nGi0/2 0")
            .unreachable("R3");
        let rig = rig(transport, core_devices());
        let plan = prepared(&rig, "group:core").await;

        let report = rig
            .runner
            .run(plan, CancellationToken::new(), false)
            .await
            .unwrap();

        // Every resolved device gets exactly one summary with a tier.
        assert_eq!(report.per_device.len(), 3);
        assert!(matches!(
            report.per_device["R1"].tier,
            Tier::Pass | Tier::Warning | Tier::Fail
        ));
        assert_eq!(report.per_device["R3"].tier, Tier::Fail);
        assert_eq!(
            report.per_device["R3"].error_kind,
            Some(ErrorKind::Transport)
        );
        assert_eq!(
            report.aggregate.pass + report.aggregate.warning + report.aggregate.fail,
            3
        );
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn criteria_drive_the_tier() {
        let transport = ReplayTransport::new()
            .respond("R1", "show interfaces status", "Gi0/1 connected")
            .respond("R1", "show interfaces counters errors", "Gi0/1 0")
            .respond("R2", "show interfaces status", "Gi0/3 connected")
            .respond("R2", "show interfaces counters errors", "Gi0/3 417");
        let rig = rig(
            transport,
            vec![
                crate::fleet::test_device("R1", "cisco_ios", &["core"]),
                crate::fleet::test_device("R2", "cisco_ios", &["core"]),
            ],
        );
        let plan = prepared(&rig, "R1,R2").await;
        let report = rig
            .runner
            .run(plan, CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.per_device["R1"].tier, Tier::Pass);
        assert_eq!(report.per_device["R2"].tier, Tier::Fail);
        assert!(report.per_device["R2"]
            .bullets
            .iter()
            .any(|b| b.contains("input_errors")));
    }

    #[tokio::test]
    async fn unsupported_platform_is_skipped() {
        let mut devices = core_devices();
        devices.push(crate::fleet::test_device("J1", "junos", &["core"]));
        let transport = ReplayTransport::new().respond_default("Gi0/1 0");
        let rig = rig(transport, devices);
        let plan = prepared(&rig, "group:core").await;
        let report = rig
            .runner
            .run(plan, CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.per_device["J1"].tier, Tier::Skipped);
        assert_eq!(report.aggregate.skipped, 1);
    }

    #[tokio::test]
    async fn transient_transport_errors_are_retried_once() {
        let transport = ReplayTransport::new()
            .respond_default("Gi0/1 0")
            .fail_once("R1", "show interfaces status");
        let rig = rig(
            transport,
            vec![crate::fleet::test_device("R1", "cisco_ios", &["core"])],
        );
        let plan = prepared(&rig, "R1").await;
        let report = rig
            .runner
            .run(plan, CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(report.per_device["R1"].tier, Tier::Pass);
        let status_calls = rig
            .transport
            .calls()
            .iter()
            .filter(|(_, op)| op == "show interfaces status")
            .count();
        assert_eq!(status_calls, 2, "one failure plus one retry");
    }

    #[tokio::test]
    async fn pre_cancelled_run_produces_an_empty_partial_report() {
        let transport = ReplayTransport::new().respond_default("Gi0/1 0");
        let rig = rig(transport, core_devices());
        let plan = prepared(&rig, "group:core").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = rig.runner.run(plan, cancel, false).await.unwrap();

        assert!(report.cancelled);
        assert!(report.per_device.is_empty());
        assert_eq!(report.aggregate.pass, 0);
    }

    #[tokio::test]
    async fn dry_run_plans_are_not_executable() {
        let transport = ReplayTransport::new();
        let rig = rig(transport, core_devices());
        let mut plan = prepared(&rig, "R1").await;
        plan.dry_run = true;
        let err = rig
            .runner
            .run(plan, CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
