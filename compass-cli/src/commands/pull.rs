use anyhow::Result;
use compass_core::{DateRange, SyncProcessor};
use owo_colors::OwoColorize;

pub async fn run(processor: &SyncProcessor, calendar_id: &str, range: &DateRange) -> Result<()> {
    println!("{}", calendar_id.bold());

    let report = match processor.pull_from_provider(calendar_id, range).await {
        Ok(report) => report,
        Err(e) => {
            println!("   {}", e.to_string().red());
            return Err(e.into());
        }
    };

    if report.is_empty() {
        println!("   {}", "Everything up to date".dimmed());
        return Ok(());
    }

    println!(
        "\nPulled {} created, {} updated, {} deleted",
        report.created.green(),
        report.updated.yellow(),
        report.deleted.red()
    );
    if report.skipped > 0 {
        println!("{}", format!("Skipped {} provider events", report.skipped).dimmed());
    }

    Ok(())
}
