//! Interactive operator session over the tool surface.
//!
//! Every command runs through the session state machine on one durable
//! thread, so write-class operations interrupt here exactly as they do
//! for an LLM-driven session, and the operator answers the approval
//! prompt inline.

use crate::bootstrap::App;
use anyhow::Result;
use colored::*;
use olav::session::ToolOutcome;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::{Value, json};
use std::collections::BTreeMap;

const HELP: &str = "\
Commands:
  /devices [filter]                    list inventory devices
  /resolve <selector>                  resolve a selector or alias
  /exec <device> <command...>          run a whitelisted command
  /caps <query>                        search the capability whitelist
  /skills                              list loaded skills
  /inspect <skill> <selector> [k=v..]  run an inspection (--dry-run, --persist)
  /search <query>                      search the knowledge base
  /read <path>                         read an agent-directory document
  /alias <name> <devices|group> <val>  add or update an alias
  /reload                              reload capabilities, skills, index
  /status                              subsystem health
  /help                                this text
  /quit                                exit";

pub async fn interactive_loop(app: &App) -> Result<()> {
    let thread = app.manager.create_thread("cli").await?;
    let mut editor = DefaultEditor::new()?;
    let history_path = app.settings.agent_dir.join(".cli_history");
    let _ = editor.load_history(&history_path);

    println!(
        "{} agent dir {}, thread {}",
        "olav".bold().green(),
        app.settings.agent_dir.display(),
        thread.thread_id.dimmed()
    );
    println!("{}", "Type /help for commands.".dimmed());

    loop {
        match editor.readline(":: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match line {
                    "/quit" | "/exit" => break,
                    "/help" => println!("{HELP}"),
                    "/reload" => {
                        if let Err(e) = crate::commands::run_reload(app).await {
                            eprintln!("{} {e:#}", "error:".red());
                        }
                    }
                    "/status" => {
                        if let Err(e) = crate::commands::run_status(app, false).await {
                            eprintln!("{} {e:#}", "error:".red());
                        }
                    }
                    "/skills" => println!("{}", app.catalog.list_for_description()),
                    _ => {
                        if let Err(e) = dispatch(app, &thread.thread_id, line).await {
                            eprintln!("{} {e:#}", "error:".red());
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {e}", "error:".red());
                break;
            }
        }
    }

    let _ = editor.save_history(&history_path);
    Ok(())
}

/// Translate a slash command into a tool invocation.
async fn dispatch(app: &App, thread_id: &str, line: &str) -> Result<()> {
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    let (tool, args): (&str, Value) = match command {
        "/devices" => (
            "list_devices",
            if rest.is_empty() {
                json!({})
            } else {
                json!({"filter": rest})
            },
        ),
        "/resolve" => ("resolve_selector", json!({"selector": rest})),
        "/exec" => {
            let Some((device, cmd)) = rest.split_once(' ') else {
                anyhow::bail!("usage: /exec <device> <command...>");
            };
            (
                "execute_command",
                json!({"device": device, "command": cmd.trim()}),
            )
        }
        "/caps" => ("search_capabilities", json!({"query": rest})),
        "/search" => ("search_knowledge", json!({"query": rest})),
        "/read" => ("read_file", json!({"path": rest})),
        "/alias" => {
            let parts: Vec<&str> = rest.splitn(3, ' ').collect();
            let &[alias, kind, value] = parts.as_slice() else {
                anyhow::bail!("usage: /alias <name> <devices|group> <value>");
            };
            (
                "update_alias",
                json!({"alias": alias, "type": kind, "value": value}),
            )
        }
        "/inspect" => {
            let mut words = rest.split_whitespace();
            let Some(skill) = words.next() else {
                anyhow::bail!("usage: /inspect <skill> <selector> [k=v ...]");
            };
            let Some(selector) = words.next() else {
                anyhow::bail!("usage: /inspect <skill> <selector> [k=v ...]");
            };
            let mut parameters: BTreeMap<String, Value> = BTreeMap::new();
            let mut dry_run = false;
            let mut persist = false;
            for word in words {
                match word {
                    "--dry-run" => dry_run = true,
                    "--persist" => persist = true,
                    _ => {
                        let Some((key, value)) = word.split_once('=') else {
                            anyhow::bail!("expected k=v, got '{word}'");
                        };
                        parameters.insert(key.to_string(), Value::String(value.to_string()));
                    }
                }
            }
            (
                "inspect",
                json!({
                    "skill": skill,
                    "selector": selector,
                    "parameters": parameters,
                    "dry_run": dry_run,
                    "persist": persist,
                }),
            )
        }
        other => anyhow::bail!("unknown command '{other}', try /help"),
    };

    run_with_approval(app, thread_id, tool, args).await
}

/// Run a tool; when it interrupts, put the approval question to the
/// operator and resume with their answer.
async fn run_with_approval(
    app: &App,
    thread_id: &str,
    tool: &str,
    args: Value,
) -> Result<()> {
    let outcome = app
        .manager
        .run_tool(thread_id, tool, args)
        .await
        .map_err(friendly_error)?;
    match outcome {
        ToolOutcome::Completed { output } => print_output(&output),
        ToolOutcome::Interrupted(interrupt) => {
            println!(
                "{} {} {}",
                "approval required:".yellow().bold(),
                interrupt.tool_name,
                serde_json::to_string(&interrupt.arguments).unwrap_or_default()
            );
            let approve = ask_yes_no("apply this change? [y/N] ")?;
            let outcome = app
                .manager
                .resume(thread_id, approve)
                .await
                .map_err(friendly_error)?;
            match outcome {
                ToolOutcome::Completed { output } => print_output(&output),
                ToolOutcome::Rejected => println!("{}", "rejected".dimmed()),
                ToolOutcome::AlreadyApplied => println!("{}", "already applied".dimmed()),
                ToolOutcome::Interrupted(_) => {
                    println!("{}", "still awaiting approval".yellow())
                }
            }
        }
        ToolOutcome::Rejected => println!("{}", "rejected".dimmed()),
        ToolOutcome::AlreadyApplied => println!("{}", "already applied".dimmed()),
    }
    Ok(())
}

fn friendly_error(e: olav::OlavError) -> anyhow::Error {
    anyhow::anyhow!("{} ({})", e, e.kind().as_str())
}

fn print_output(output: &str) {
    // Pretty-print JSON tool replies; pass markdown and text through.
    match serde_json::from_str::<Value>(output) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| output.to_string())
        ),
        Err(_) => println!("{output}"),
    }
}

fn ask_yes_no(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
