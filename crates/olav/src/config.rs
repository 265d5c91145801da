//! Layered configuration for the core.
//!
//! Precedence, lowest to highest: compiled defaults, the `settings.json`
//! document in the agent directory, then `OLAV_*` environment variables
//! (reserved for secrets and deployment wiring).

use crate::error::{OlavError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILENAME: &str = "settings.json";
/// Identity document at the agent-directory root, read-only to agents.
pub const IDENTITY_FILENAME: &str = "OLAV.md";

/// Seeded on first run; operators replace it with their own brief.
const DEFAULT_IDENTITY: &str = "\
# OLAV

You are OLAV, a network operations assistant. You act only through the
whitelisted command and API surface, you ask for approval before any
write, and you record resolved incidents under knowledge/solutions/.
";

/// Default per-command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
/// Hard cap on any per-command timeout.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;
/// Default TCP/SSH connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Idle window after which a Ready connection is closed.
pub const DEFAULT_IDLE_CLOSE_SECS: u64 = 300;
/// Concurrent device sessions per process.
pub const DEFAULT_MAX_SESSIONS: usize = 50;
/// Concurrent devices per inspection.
pub const DEFAULT_DEVICE_CONCURRENCY: usize = 10;
/// Concurrent inspections per process.
pub const DEFAULT_MAX_INSPECTIONS: usize = 4;
/// Grace period for in-flight tasks after cancellation, in seconds.
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 5;
/// Reports above this many estimated tokens are spilled to a file.
pub const DEFAULT_REPORT_TOKEN_LIMIT: usize = 20_000;
/// Backoff before the single idempotent-read retry, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
/// Top-K candidates taken from each of the lexical and vector rankings.
pub const DEFAULT_SEARCH_CANDIDATES: usize = 50;
/// Fused result count.
pub const DEFAULT_SEARCH_RESULTS: usize = 10;
/// Final count after reranking.
pub const DEFAULT_RERANK_RESULTS: usize = 5;

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_idle_close() -> u64 {
    DEFAULT_IDLE_CLOSE_SECS
}
fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}
fn default_device_concurrency() -> usize {
    DEFAULT_DEVICE_CONCURRENCY
}
fn default_max_inspections() -> usize {
    DEFAULT_MAX_INSPECTIONS
}
fn default_cancel_grace() -> u64 {
    DEFAULT_CANCEL_GRACE_SECS
}
fn default_report_token_limit() -> usize {
    DEFAULT_REPORT_TOKEN_LIMIT
}
fn default_retry_backoff() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}
fn default_search_candidates() -> usize {
    DEFAULT_SEARCH_CANDIDATES
}
fn default_search_results() -> usize {
    DEFAULT_SEARCH_RESULTS
}
fn default_rerank_results() -> usize {
    DEFAULT_RERANK_RESULTS
}
fn default_true() -> bool {
    true
}
fn default_thread_db() -> String {
    "threads.db".to_string()
}
fn default_audit_file() -> String {
    "audit.jsonl".to_string()
}
fn default_audit_queue() -> usize {
    256
}

/// Fleet execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Default per-command timeout, seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Connect/authenticate timeout, seconds. Enforced separately from the
    /// per-command read timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle window after which Ready connections are closed, seconds.
    #[serde(default = "default_idle_close")]
    pub idle_close_secs: u64,

    /// Concurrent device sessions per process.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Return raw output when a template parse raises, instead of failing.
    #[serde(default = "default_true")]
    pub parse_fallback: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_close_secs: DEFAULT_IDLE_CLOSE_SECS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            parse_fallback: true,
        }
    }
}

impl ExecutionSettings {
    /// Clamp a requested timeout into the permitted range.
    pub fn clamp_timeout(&self, requested: Option<Duration>) -> Duration {
        let secs = requested
            .map(|d| d.as_secs().max(1))
            .unwrap_or(self.command_timeout_secs);
        Duration::from_secs(secs.min(MAX_COMMAND_TIMEOUT_SECS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_close(&self) -> Duration {
        Duration::from_secs(self.idle_close_secs)
    }
}

/// Inspection orchestrator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionSettings {
    #[serde(default = "default_device_concurrency")]
    pub device_concurrency: usize,

    #[serde(default = "default_max_inspections")]
    pub max_concurrent_inspections: usize,

    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,

    #[serde(default = "default_report_token_limit")]
    pub report_token_limit: usize,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for InspectionSettings {
    fn default() -> Self {
        Self {
            device_concurrency: DEFAULT_DEVICE_CONCURRENCY,
            max_concurrent_inspections: DEFAULT_MAX_INSPECTIONS,
            cancel_grace_secs: DEFAULT_CANCEL_GRACE_SECS,
            report_token_limit: DEFAULT_REPORT_TOKEN_LIMIT,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl InspectionSettings {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Hybrid search knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Top-K taken from each of the lexical and vector rankings.
    #[serde(default = "default_search_candidates")]
    pub candidates: usize,

    /// Result count after reciprocal rank fusion.
    #[serde(default = "default_search_results")]
    pub results: usize,

    /// Final result count when a reranker is configured.
    #[serde(default = "default_rerank_results")]
    pub reranked: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_SEARCH_CANDIDATES,
            results: DEFAULT_SEARCH_RESULTS,
            reranked: DEFAULT_RERANK_RESULTS,
        }
    }
}

/// Session and audit persistence knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Thread store database file, relative to the agent directory.
    #[serde(default = "default_thread_db")]
    pub thread_db: String,

    /// Audit log file, relative to the agent directory.
    #[serde(default = "default_audit_file")]
    pub audit_file: String,

    /// Bounded depth of the audit writer queue.
    #[serde(default = "default_audit_queue")]
    pub audit_queue_depth: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            thread_db: default_thread_db(),
            audit_file: default_audit_file(),
            audit_queue_depth: default_audit_queue(),
        }
    }
}

/// Full layered configuration snapshot.
///
/// Rebuilt on reload and passed by value through constructors; there is no
/// process-global settings singleton.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(skip)]
    pub agent_dir: PathBuf,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub inspection: InspectionSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,
}

impl Settings {
    /// Load the layered configuration for an agent directory.
    ///
    /// A missing `settings.json` is not an error; the compiled defaults
    /// apply. A present but malformed document is.
    pub fn load(agent_dir: impl Into<PathBuf>) -> Result<Self> {
        let agent_dir = agent_dir.into();
        let mut settings = match std::fs::read_to_string(agent_dir.join(SETTINGS_FILENAME)) {
            Ok(text) => serde_json::from_str::<Settings>(&text)
                .map_err(|e| OlavError::Internal(format!("settings.json: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => return Err(e.into()),
        };
        settings.agent_dir = agent_dir;
        settings.apply_env();
        Ok(settings)
    }

    /// Environment layer. Only deployment wiring is honoured here; secrets
    /// go through the credential provider.
    fn apply_env(&mut self) {
        if let Some(n) = env_usize("OLAV_DEVICE_CONCURRENCY") {
            self.inspection.device_concurrency = n.max(1);
        }
        if let Some(n) = env_usize("OLAV_MAX_SESSIONS") {
            self.execution.max_sessions = n.max(1);
        }
        if let Ok(path) = std::env::var("OLAV_THREAD_DB") {
            self.persistence.thread_db = path;
        }
        if let Ok(path) = std::env::var("OLAV_AUDIT_FILE") {
            self.persistence.audit_file = path;
        }
    }

    // Path helpers over the fixed agent-directory layout.

    pub fn identity_file(&self) -> PathBuf {
        self.agent_dir.join(IDENTITY_FILENAME)
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.agent_dir.join("skills")
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        self.agent_dir.join("knowledge")
    }

    pub fn solutions_dir(&self) -> PathBuf {
        self.knowledge_dir().join("solutions")
    }

    pub fn aliases_file(&self) -> PathBuf {
        self.knowledge_dir().join("aliases.md")
    }

    pub fn commands_dir(&self) -> PathBuf {
        self.agent_dir.join("imports").join("commands")
    }

    pub fn apis_dir(&self) -> PathBuf {
        self.agent_dir.join("imports").join("apis")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.knowledge_dir().join("reports")
    }

    pub fn thread_db_path(&self) -> PathBuf {
        self.agent_dir.join(&self.persistence.thread_db)
    }

    pub fn audit_file_path(&self) -> PathBuf {
        self.agent_dir.join(&self.persistence.audit_file)
    }

    /// Create the agent-directory skeleton. Idempotent; existing files
    /// are never touched.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.skills_dir(),
            self.solutions_dir(),
            self.commands_dir(),
            self.apis_dir(),
            self.reports_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        let identity = self.identity_file();
        if !identity.exists() {
            std::fs::write(identity, DEFAULT_IDENTITY)?;
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Convenience for tests and embedders: settings rooted at `dir` with
/// compiled defaults everywhere else.
pub fn for_dir(dir: &Path) -> Settings {
    Settings {
        agent_dir: dir.to_path_buf(),
        ..Settings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(
            settings.execution.command_timeout_secs,
            DEFAULT_COMMAND_TIMEOUT_SECS
        );
        assert_eq!(
            settings.inspection.device_concurrency,
            DEFAULT_DEVICE_CONCURRENCY
        );
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILENAME),
            r#"{"inspection": {"device_concurrency": 3}}"#,
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.inspection.device_concurrency, 3);
        // untouched sections keep their defaults
        assert_eq!(settings.search.results, DEFAULT_SEARCH_RESULTS);
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILENAME), "{not json").unwrap();
        assert!(Settings::load(dir.path()).is_err());
    }

    #[test]
    fn timeout_clamping() {
        let exec = ExecutionSettings::default();
        assert_eq!(exec.clamp_timeout(None), Duration::from_secs(30));
        assert_eq!(
            exec.clamp_timeout(Some(Duration::from_secs(900))),
            Duration::from_secs(300)
        );
        assert_eq!(
            exec.clamp_timeout(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let settings = for_dir(dir.path());
        settings.ensure_layout().unwrap();
        settings.ensure_layout().unwrap();
        assert!(settings.commands_dir().is_dir());
        assert!(settings.solutions_dir().is_dir());
        assert!(settings.identity_file().is_file());

        // A customized identity document survives re-runs.
        std::fs::write(settings.identity_file(), "# Custom").unwrap();
        settings.ensure_layout().unwrap();
        assert_eq!(
            std::fs::read_to_string(settings.identity_file()).unwrap(),
            "# Custom"
        );
    }
}
