use crate::bootstrap::App;
use anyhow::Result;
use colored::*;
use serde_json::json;

pub async fn run_status(app: &App, as_json: bool) -> Result<()> {
    let threads = app.manager.list_threads().await?;
    let interrupted = threads
        .iter()
        .filter(|t| t.state == olav::session::ThreadState::Interrupted)
        .count();

    if as_json {
        let doc = json!({
            "agent_dir": app.settings.agent_dir.display().to_string(),
            "capabilities": app.registry.len(),
            "skills": app.catalog.len(),
            "knowledge_documents": app.store.index().len(),
            "open_connections": app.engine.open_connections(),
            "threads": threads.len(),
            "threads_awaiting_approval": interrupted,
            "settings": app.settings,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", "OLAV status".bold());
    println!("  agent dir:          {}", app.settings.agent_dir.display());
    println!("  capabilities:       {}", app.registry.len());
    println!("  skills:             {}", app.catalog.len());
    println!("  knowledge docs:     {}", app.store.index().len());
    println!("  open connections:   {}", app.engine.open_connections());
    println!("  threads:            {}", threads.len());
    if interrupted > 0 {
        println!(
            "  {} {}",
            "awaiting approval:".yellow(),
            interrupted
        );
    }
    Ok(())
}
