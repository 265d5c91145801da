//! Execution and knowledge core for OLAV, a network-operations assistant.
//!
//! The crate is organised around five subsystems:
//!
//! - [`capability`] — the whitelist of permitted CLI commands and API
//!   operations, loaded from files and matched before any device I/O.
//! - [`fleet`] — authenticated parallel command/API execution across a
//!   dynamic inventory, with structured parsing and token accounting.
//! - [`inspect`] — a map-reduce scheduler that fans a skill out over a
//!   device set and reduces per-device results into a bounded report.
//! - [`knowledge`] — a path-addressed markdown store with a permission
//!   matrix and hybrid lexical+vector search.
//! - [`session`] — durable conversation threads with cooperative
//!   interruption points for human approval of write operations.
//!
//! External collaborators (inventory of record, device transports, the LLM
//! provider, embedder/reranker, audit sinks) are trait seams; the crate
//! ships in-memory and file-backed reference implementations where that is
//! cheap, and test doubles everywhere else.

pub mod audit;
pub mod capability;
pub mod config;
pub mod error;
pub mod fleet;
pub mod hash;
pub mod inspect;
pub mod knowledge;
pub mod session;
pub mod tokens;
pub mod tools;

pub use config::Settings;
pub use error::{ErrorKind, OlavError, Result};
