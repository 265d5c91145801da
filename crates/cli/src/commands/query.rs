use crate::bootstrap::App;
use anyhow::Result;
use colored::*;
use olav::knowledge::SearchFilters;

/// One-shot operator query: capability matches plus knowledge hits.
pub async fn run_query(app: &App, text: &str) -> Result<()> {
    let capabilities = app.registry.search(text, None, None, 10);
    if capabilities.is_empty() {
        println!("{}", "No matching capabilities.".dimmed());
    } else {
        println!("{}", "Capabilities".bold());
        for cap in capabilities {
            let write_tag = if cap.is_write {
                " [write]".red().to_string()
            } else {
                String::new()
            };
            println!(
                "  {} ({}){}  {}",
                cap.pattern,
                cap.platform,
                write_tag,
                cap.description.dimmed()
            );
        }
    }

    let hits = app
        .store
        .search(text, &SearchFilters::default(), None)
        .await?;
    if hits.is_empty() {
        println!("{}", "No knowledge hits.".dimmed());
    } else {
        println!("{}", "Knowledge".bold());
        for hit in hits {
            println!("  {:.3}  {}", hit.score, hit.doc_id.cyan());
            println!("         {}", hit.snippet.dimmed());
        }
    }
    Ok(())
}
