use std::path::Path;

use anyhow::{Context, Result};
use compass_core::processor::ChangeSummary;
use compass_core::{ChangeRequest, SyncProcessor};
use owo_colors::OwoColorize;

pub async fn run(processor: &SyncProcessor, file: &Path, json: bool) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Could not read {}", file.display()))?;
    let changes: Vec<ChangeRequest> = serde_json::from_str(&contents)
        .with_context(|| format!("Could not parse change requests in {}", file.display()))?;

    tracing::debug!(file = %file.display(), count = changes.len(), "loaded change requests");
    let results = processor.process_batch(&changes).await;

    let mut summaries = Vec::new();
    let mut failed = 0;
    for (change, result) in changes.iter().zip(results) {
        match result {
            Ok(items) if items.is_empty() && !json => {
                println!("  {} {}", "·".dimmed(), format!("{} (no change)", change.payload.id).dimmed());
            }
            Ok(items) => {
                if !json {
                    items.iter().for_each(render);
                }
                summaries.extend(items);
            }
            Err(e) => {
                failed += 1;
                if !json {
                    println!("  {} {} {}", "✗".red(), change.payload.id, e.to_string().red());
                }
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        println!(
            "\nApplied {} of {} changes",
            changes.len() - failed,
            changes.len()
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} change(s) rejected");
    }
    Ok(())
}

fn render(summary: &ChangeSummary) {
    let tag = summary.operation.to_string();
    println!("  {} {} {}", "✓".green(), summary.title, tag.dimmed());
    for warning in &summary.warnings {
        println!("    {} {}", "!".yellow(), warning.yellow());
    }
}
