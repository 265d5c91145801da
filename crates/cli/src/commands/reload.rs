use crate::bootstrap::App;
use anyhow::Result;
use colored::*;

pub async fn run_reload(app: &App) -> Result<()> {
    let summary = app.registry.reload()?;
    println!("{}", "Capabilities".bold());
    for (key, count) in &summary.loaded {
        println!("  {key}: {count}");
    }
    println!("  total: {}", summary.total());

    let skills = app.catalog.reload()?;
    println!("{}", "Skills".bold());
    println!("  enabled: {skills}");

    let docs = app.store.index().rebuild().await?;
    println!("{}", "Knowledge index".bold());
    println!("  documents: {docs}");
    Ok(())
}
