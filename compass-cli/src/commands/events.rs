use anyhow::Result;
use compass_core::{DateRange, EventTime, SyncProcessor, classify};
use owo_colors::OwoColorize;

pub async fn run(
    processor: &SyncProcessor,
    calendar_id: &str,
    range: &DateRange,
    someday: bool,
) -> Result<()> {
    let events = processor.list_events(calendar_id, range, someday).await?;

    if events.is_empty() {
        println!("{}", "No events found".dimmed());
        return Ok(());
    }

    // Group events by day and print
    let mut current_date: Option<String> = None;

    for event in &events {
        let date_label = format_date_label(&event.start_date);

        if current_date.as_ref() != Some(&date_label) {
            if current_date.is_some() {
                println!();
            }
            println!("{}", date_label.bold());
            current_date = Some(date_label);
        }

        let time = format_time(&event.start_date);
        let tag = format!("[{}]", classify(event));
        let title = if event.title().is_empty() {
            "(untitled)"
        } else {
            event.title()
        };
        println!("  {} {} {}", time, title, tag.dimmed());
    }

    Ok(())
}

/// Format a date as a human-readable label (e.g. "Today", "Tomorrow", "Wed Feb 25")
fn format_date_label(time: &EventTime) -> String {
    let today = chrono::Local::now().date_naive();
    let date = time.date();

    match (date - today).num_days() {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        _ => date.format("%a %b %-d").to_string(),
    }
}

/// Format the time portion of an event (e.g. "15:00" or "all-day")
fn format_time(time: &EventTime) -> String {
    match time {
        EventTime::Date(_) => "all-day".to_string(),
        EventTime::DateTime(dt) => format!("{:>7}", dt.format("%H:%M")),
    }
}
