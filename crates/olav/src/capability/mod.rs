//! Capability whitelist: the single source of truth for which operations
//! the core may run against devices and systems of record.

mod loader;
mod registry;
mod types;

pub use loader::{load_apis_dir, load_commands_dir};
pub use registry::{CapabilityRegistry, ReloadSummary};
pub use types::{Capability, CapabilityKind, normalize_command};
