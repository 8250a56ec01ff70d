mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use common::{CAL, Harness, event, weekly_rule};
use compass_core::provider::{
    MemoryProvider, ProviderEvent, ProviderStatus, ProviderSync, ProviderTime,
};
use compass_core::store::MemoryStore;
use compass_core::{
    ApplyTo, ChangeRequest, CompassError, DateRange, ImportReport, Origin, ScopeResolver,
    SyncProcessor,
};
use rstest::{fixture, rstest};

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

fn day(s: &str) -> ProviderTime {
    ProviderTime {
        date: Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()),
        date_time: None,
    }
}

fn wire(summary: &str, start: &str, end: &str) -> ProviderEvent {
    ProviderEvent {
        summary: Some(summary.into()),
        start: day(start),
        end: day(end),
        ..Default::default()
    }
}

#[rstest]
#[tokio::test]
async fn pull_imports_new_standalone_event(harness: Harness) {
    let pid = harness
        .provider
        .seed(CAL, wire("Dentist", "2025-03-03", "2025-03-03"))
        .await;

    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();
    assert_eq!(
        report,
        ImportReport {
            created: 1,
            ..Default::default()
        }
    );

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title(), "Dentist");
    assert_eq!(rows[0].provider_event_id.as_deref(), Some(pid.as_str()));
    assert_eq!(rows[0].origin, Origin::Provider);
    assert!(rows[0].is_all_day);

    // Nothing changed upstream, so a second pull is a no-op
    let again = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[rstest]
#[tokio::test]
async fn pull_expands_series_and_attaches_provider_instance(harness: Harness) {
    let mut base = wire("Standup", "2025-01-05", "2025-01-11");
    base.recurrence = weekly_rule(3);
    let base_pid = harness.provider.seed(CAL, base).await;

    // Provider-side exception for the first instance week
    let mut moved = wire("Standup (moved)", "2025-01-13", "2025-01-13");
    moved.recurring_event_id = Some(base_pid.clone());
    let moved_pid = harness.provider.seed(CAL, moved).await;

    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 0);

    let local_base = harness.bases().await.remove(0);
    assert_eq!(local_base.provider_event_id.as_deref(), Some(base_pid.as_str()));

    let instances = harness.instances(&local_base).await;
    assert_eq!(instances.len(), 3);
    assert!(
        instances
            .iter()
            .all(|i| i.provider_recurring_event_id.as_deref() == Some(base_pid.as_str()))
    );

    let attached: Vec<_> = instances
        .iter()
        .filter(|i| i.provider_event_id.as_deref() == Some(moved_pid.as_str()))
        .collect();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].title(), "Standup (moved)");
    assert_eq!(attached[0].recurrence_event_id(), Some(local_base.id.as_str()));
}

#[rstest]
#[tokio::test]
async fn pull_skips_orphaned_and_ambiguous_events(harness: Harness) {
    let mut orphan = wire("Orphan", "2025-03-03", "2025-03-03");
    orphan.recurring_event_id = Some("never-seen".into());
    harness.provider.seed(CAL, orphan).await;

    let mut ambiguous = wire("Both", "2025-03-04", "2025-03-04");
    ambiguous.recurrence = weekly_rule(2);
    ambiguous.recurring_event_id = Some("other".into());
    harness.provider.seed(CAL, ambiguous).await;

    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();

    assert_eq!(report.skipped, 2);
    assert_eq!(report.created, 0);
    assert!(harness.rows().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn pull_deletes_rows_cancelled_upstream(harness: Harness) {
    let change = ChangeRequest::confirmed(
        event("dentist", "Dentist", "2025-03-03", "2025-03-03"),
        ApplyTo::ThisEvent,
    );
    harness.processor.process_change(&change).await.unwrap();
    let pid = harness.rows().await[0].provider_event_id.clone().unwrap();

    assert!(harness.provider.cancel(CAL, &pid).await);
    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert!(harness.rows().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn pull_cancelled_series_removes_all_rows(harness: Harness) {
    let base = harness.create_weekly(4).await;
    let pid = base.provider_event_id.clone().unwrap();

    harness.provider.cancel(CAL, &pid).await;
    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();

    assert_eq!(report.deleted, 5);
    assert!(harness.rows().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn pull_applies_upstream_title_change(harness: Harness) {
    let change = ChangeRequest::confirmed(
        event("dentist", "Dentist", "2025-03-03", "2025-03-03"),
        ApplyTo::ThisEvent,
    );
    harness.processor.process_change(&change).await.unwrap();
    let local = harness.rows().await.remove(0);
    let pid = local.provider_event_id.clone().unwrap();

    let mut upstream = harness.provider.get(CAL, &pid).await.unwrap();
    upstream.summary = Some("Dentist (rescheduled)".into());
    upstream.updated = Some(chrono::Utc::now());
    harness.provider.seed(CAL, upstream).await;

    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();
    assert_eq!(report.updated, 1);

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, local.id);
    assert_eq!(rows[0].title(), "Dentist (rescheduled)");
}

#[rstest]
#[tokio::test]
async fn pull_leaves_newer_local_copy(harness: Harness) {
    let change = ChangeRequest::confirmed(
        event("dentist", "Dentist", "2025-03-03", "2025-03-03"),
        ApplyTo::ThisEvent,
    );
    harness.processor.process_change(&change).await.unwrap();
    let pid = harness.rows().await[0].provider_event_id.clone().unwrap();

    let mut stale = harness.provider.get(CAL, &pid).await.unwrap();
    stale.summary = Some("Old name".into());
    stale.updated = Some(chrono::DateTime::UNIX_EPOCH);
    harness.provider.seed(CAL, stale).await;

    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();

    assert!(report.is_empty());
    assert_eq!(harness.rows().await[0].title(), "Dentist");
}

#[rstest]
#[tokio::test]
async fn pull_cancelled_unknown_event_is_ignored(harness: Harness) {
    let mut gone = wire("Gone", "2025-03-03", "2025-03-03");
    gone.status = ProviderStatus::Cancelled;
    harness.provider.seed(CAL, gone).await;

    let report = harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn pull_without_provider_is_a_config_error() {
    let processor = SyncProcessor::new(Arc::new(MemoryStore::new()), ScopeResolver::default());
    let err = processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap_err();
    assert!(matches!(err, CompassError::Config(_)));
}

#[rstest]
#[tokio::test]
async fn pull_renames_every_row_of_a_series(harness: Harness) {
    let base = harness.create_weekly(3).await;
    let pid = base.provider_event_id.clone().unwrap();

    let mut upstream = harness.provider.get(CAL, &pid).await.unwrap();
    upstream.summary = Some("Standup (renamed)".into());
    upstream.updated = Some(Utc::now());
    harness.provider.seed(CAL, upstream).await;

    harness
        .processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.title() == "Standup (renamed)"));
}

#[rstest]
#[tokio::test]
async fn pull_and_local_edit_of_same_series_do_not_interleave(harness: Harness) {
    let base = harness.create_weekly(4).await;
    let pid = base.provider_event_id.clone().unwrap();

    let mut upstream = harness.provider.get(CAL, &pid).await.unwrap();
    upstream.summary = Some("Upstream".into());
    upstream.updated = Some(Utc::now());
    harness.provider.seed(CAL, upstream).await;
    harness
        .provider
        .set_latency(Some(Duration::from_millis(20)))
        .await;

    let mut local = harness.instances(&base).await.remove(0);
    local.title = Some("Local".into());
    let change = ChangeRequest::confirmed(local, ApplyTo::AllEvents);

    let range = DateRange::unbounded();
    let (edit, pull) = tokio::join!(
        harness.processor.process_change(&change),
        harness.processor.pull_from_provider(CAL, &range),
    );
    edit.unwrap();
    pull.unwrap();

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 5);
    let title = rows[0].title().to_string();
    assert!(title == "Local" || title == "Upstream");
    assert!(rows.iter().all(|r| r.title() == title));
}

#[tokio::test]
async fn pull_caps_unbounded_series_at_configured_instances() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MemoryProvider::new());
    let processor = SyncProcessor::new(store, ScopeResolver::new(5, vec![]))
        .with_provider(ProviderSync::new(provider.clone(), Duration::from_secs(5)));

    let mut base = wire("Gym", "2025-01-05", "2025-01-11");
    base.recurrence = vec!["RRULE:FREQ=WEEKLY".into()];
    provider.seed(CAL, base).await;

    let report = processor
        .pull_from_provider(CAL, &DateRange::unbounded())
        .await
        .unwrap();
    assert_eq!(report.created, 1);

    let rows = processor
        .list_events(CAL, &DateRange::unbounded(), false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);
}
