use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments for the OLAV host process.
#[derive(Parser, Debug)]
#[clap(
    name = "olav",
    about = "Network operations assistant: whitelisted fleet execution, inspections, and a searchable knowledge base"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Agent directory (skills/, knowledge/, imports/, settings.json).
    /// Defaults to $OLAV_AGENT_DIR, then the current directory.
    #[arg(long, global = true)]
    pub agent_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild the capability registry and skill catalog from files.
    Reload,

    /// Report subsystem health and counts.
    Status {
        /// Emit machine-readable JSON instead of the table.
        #[arg(long)]
        json: bool,
    },

    /// One-shot query against the capability whitelist and the knowledge
    /// base.
    Query {
        #[arg()]
        text: String,
    },
}

pub fn resolve_agent_dir(args: &CliArgs) -> PathBuf {
    args.agent_dir
        .clone()
        .or_else(|| std::env::var("OLAV_AGENT_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}
