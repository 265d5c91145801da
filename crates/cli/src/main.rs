use anyhow::Result;
use clap::Parser;
use olav::error::ErrorKind;

mod bootstrap;
mod cli_args;
mod commands;
mod repl;
mod tracing;

use bootstrap::App;
use cli_args::{CliArgs, Commands, resolve_agent_dir};
use commands::{run_query, run_reload, run_status};
use repl::interactive_loop;

#[tokio::main]
async fn main() {
    tracing::setup_logging();
    let args = CliArgs::parse();
    let agent_dir = resolve_agent_dir(&args);

    let code = match run(args, &agent_dir).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

async fn run(args: CliArgs, agent_dir: &std::path::Path) -> Result<()> {
    let app = App::bootstrap(agent_dir).await?;
    match args.command {
        Some(Commands::Reload) => run_reload(&app).await,
        Some(Commands::Status { json }) => run_status(&app, json).await,
        Some(Commands::Query { text }) => run_query(&app, &text).await,
        None => interactive_loop(&app).await,
    }
}

/// Exit codes are categorized by error kind so wrappers can branch
/// without parsing messages.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    let Some(core) = err.downcast_ref::<olav::OlavError>() else {
        return 1;
    };
    match core.kind() {
        ErrorKind::NotPermitted => 3,
        ErrorKind::NeedsApproval => 4,
        ErrorKind::NotFound => 5,
        ErrorKind::Auth => 6,
        ErrorKind::Transport => 7,
        ErrorKind::Timeout => 8,
        ErrorKind::ParseFailed => 9,
        ErrorKind::EmptyScope => 10,
        ErrorKind::Busy => 11,
        ErrorKind::Internal => 1,
    }
}
