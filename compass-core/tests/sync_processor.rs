mod common;

use std::sync::Arc;

use common::{CAL, Harness, event, weekly_draft};
use compass_core::filter::Filter;
use compass_core::provider::ProviderStatus;
use compass_core::recurrence::{RecurrenceRule, expand};
use compass_core::store::{EventStore, FileStore, MemoryStore};
use compass_core::{
    ApplyTo, Category, ChangeRequest, CompassError, ErrorKind, Event, Recurrence, ScopeResolver,
    SeriesRole, SyncProcessor,
};
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[rstest]
#[tokio::test]
async fn weekly_series_creates_base_and_instances(harness: Harness) {
    let change = ChangeRequest::confirmed(weekly_draft(10), ApplyTo::ThisEvent);
    let summaries = harness.processor.process_change(&change).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(
        serde_json::to_value(&summaries[0]).unwrap(),
        json!({
            "title": "Standup",
            "operation": "RECURRENCE_BASE_CREATED",
            "category": "RECURRENCE_BASE",
            "transition": [null, "RECURRENCE_BASE_CONFIRMED"],
        })
    );

    let bases = harness.bases().await;
    assert_eq!(bases.len(), 1);
    let base = &bases[0];
    assert_eq!(base.recurrence_event_id(), Some(base.id.as_str()));

    let instances = harness.instances(base).await;
    assert_eq!(instances.len(), 10);
    assert_eq!(harness.rows().await.len(), 11);

    // Only the base is mirrored; instances point at its provider id
    let provider_id = base.provider_event_id.clone().expect("base was pushed");
    assert_eq!(harness.provider.events(CAL).await.len(), 1);
    for instance in &instances {
        assert_eq!(instance.recurrence_event_id(), Some(base.id.as_str()));
        assert_eq!(instance.provider_recurring_event_id.as_ref(), Some(&provider_id));
    }
}

#[rstest]
#[tokio::test]
async fn all_events_title_change_from_instance_updates_whole_series(harness: Harness) {
    let base = harness.create_weekly(10).await;
    let before = harness.instances(&base).await;

    let mut payload = before[0].clone();
    payload.title = Some("Weekly sync".into());
    let change = ChangeRequest::confirmed(payload, ApplyTo::AllEvents);
    let summaries = harness.processor.process_change(&change).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].operation.to_string(), "RECURRENCE_BASE_UPDATED");
    assert_eq!(
        serde_json::to_value(summaries[0].transition).unwrap(),
        json!(["RECURRENCE_BASE", "RECURRENCE_BASE_CONFIRMED"])
    );

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 11);
    assert!(rows.iter().all(|r| r.title() == "Weekly sync"));

    let after = harness.instances(&base).await;
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.start_date, new.start_date);
        assert_eq!(old.end_date, new.end_date);
    }

    let pid = base.provider_event_id.unwrap();
    let mirrored = harness.provider.get(CAL, &pid).await.unwrap();
    assert_eq!(mirrored.summary.as_deref(), Some("Weekly sync"));
}

#[rstest]
#[tokio::test]
async fn someday_conversion_strips_provider_ids(harness: Harness) {
    let base = harness.create_weekly(4).await;

    let mut payload = base.clone();
    payload.is_someday = true;
    let summaries = harness
        .processor
        .process_change(&ChangeRequest::confirmed(payload, ApplyTo::AllEvents))
        .await
        .unwrap();

    assert_eq!(summaries[0].category, Category::Someday(SeriesRole::Base));

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 5);
    for row in &rows {
        assert!(row.is_someday);
        assert!(row.provider_event_id.is_none());
        assert!(row.provider_recurring_event_id.is_none());
    }
    assert!(harness.provider.events(CAL).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn this_and_following_delete_keeps_earlier_rows(harness: Harness) {
    let base = harness.create_weekly(10).await;
    let instances = harness.instances(&base).await;

    let change = ChangeRequest::cancelled(instances[4].clone(), ApplyTo::ThisAndFollowingEvents);
    harness.processor.process_change(&change).await.unwrap();

    let remaining = harness.instances(&base).await;
    let kept: Vec<_> = remaining.iter().map(|e| e.id.clone()).collect();
    let expected: Vec<_> = instances[..4].iter().map(|e| e.id.clone()).collect();
    assert_eq!(kept, expected);

    let stored_base = harness.bases().await.remove(0);
    assert_eq!(stored_base, base);
}

#[rstest]
#[tokio::test]
async fn all_events_delete_removes_series_everywhere(harness: Harness) {
    let base = harness.create_weekly(3).await;
    let instance = harness.instances(&base).await.remove(1);

    let summaries = harness
        .processor
        .process_change(&ChangeRequest::cancelled(instance, ApplyTo::AllEvents))
        .await
        .unwrap();

    assert_eq!(summaries[0].operation.to_string(), "RECURRENCE_BASE_DELETED");
    assert_eq!(summaries[0].transition.to, None);
    assert!(harness.rows().await.is_empty());
    assert!(harness.provider.events(CAL).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn this_and_following_update_splits_series(harness: Harness) {
    let base = harness.create_weekly(10).await;
    let instances = harness.instances(&base).await;

    let mut payload = instances[3].clone();
    payload.title = Some("Retro".into());
    harness
        .processor
        .process_change(&ChangeRequest::confirmed(payload, ApplyTo::ThisAndFollowingEvents))
        .await
        .unwrap();

    let bases = harness.bases().await;
    assert_eq!(bases.len(), 2);
    let (old, new) = (&bases[0], &bases[1]);
    assert_eq!(old.id, base.id);
    assert_eq!(new.id, instances[3].id);
    assert_eq!(old.rule(), Some(&["RRULE:FREQ=WEEKLY;COUNT=3".to_string()][..]));

    let old_instances = harness.instances(old).await;
    assert_eq!(old_instances.len(), 3);
    assert!(old_instances.iter().all(|i| i.title() == "Standup"));

    let new_instances = harness.instances(new).await;
    assert_eq!(new_instances.len(), 6);
    assert!(new_instances.iter().all(|i| i.title() == "Retro"));

    // Two provider series now
    let new_pid = new.provider_event_id.clone().expect("new series pushed");
    assert_ne!(Some(&new_pid), old.provider_event_id.as_ref());
    assert!(
        new_instances
            .iter()
            .all(|i| i.provider_recurring_event_id.as_ref() == Some(&new_pid))
    );
}

#[rstest]
#[tokio::test]
async fn base_without_rule_collapses_to_single_event(harness: Harness) {
    let base = harness.create_weekly(4).await;

    let mut payload = base.clone();
    payload.recurrence = Some(Recurrence {
        rule: None,
        event_id: Some(base.id.clone()),
    });
    let summaries = harness
        .processor
        .process_change(&ChangeRequest::confirmed(payload, ApplyTo::AllEvents))
        .await
        .unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].operation.to_string(), "REGULAR_UPDATED");
    assert_eq!(
        serde_json::to_value(summaries[0].transition).unwrap(),
        json!(["RECURRENCE_BASE", "REGULAR_CONFIRMED"])
    );

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, base.id);
    assert_eq!(rows[0].recurrence, None);

    let upstream = harness.provider.events(CAL).await;
    assert_eq!(upstream.len(), 1);
    assert!(upstream[0].recurrence.is_empty());
}

#[rstest]
#[tokio::test]
async fn this_event_instance_edit_reaches_provider(harness: Harness) {
    let base = harness.create_weekly(4).await;
    let base_pid = base.provider_event_id.clone().expect("base was pushed");

    let mut payload = harness.instances(&base).await.remove(2);
    payload.title = Some("Moved".into());
    let summaries = harness
        .processor
        .process_change(&ChangeRequest::confirmed(payload.clone(), ApplyTo::ThisEvent))
        .await
        .unwrap();
    assert!(summaries[0].warnings.is_empty());

    let stored = harness
        .store
        .find_one(&Filter::by_id(CAL, &payload.id))
        .await
        .unwrap()
        .expect("instance kept");
    let pid = stored.provider_event_id.clone().expect("instance was pushed");

    let upstream = harness.provider.get(CAL, &pid).await.expect("exception upstream");
    assert_eq!(upstream.summary.as_deref(), Some("Moved"));
    assert_eq!(upstream.recurring_event_id, Some(base_pid));
    assert_eq!(harness.provider.events(CAL).await.len(), 2);

    // The rest of the series is untouched
    let others: Vec<Event> = harness
        .instances(&base)
        .await
        .into_iter()
        .filter(|i| i.id != payload.id)
        .collect();
    assert_eq!(others.len(), 3);
    assert!(others.iter().all(|i| i.title() == "Standup"));
}

#[rstest]
#[tokio::test]
async fn this_event_instance_delete_cancels_provider_occurrence(harness: Harness) {
    let base = harness.create_weekly(4).await;
    let base_pid = base.provider_event_id.clone().expect("base was pushed");
    let target = harness.instances(&base).await.remove(2);

    let summaries = harness
        .processor
        .process_change(&ChangeRequest::cancelled(target.clone(), ApplyTo::ThisEvent))
        .await
        .unwrap();
    assert!(summaries[0].warnings.is_empty());
    assert_eq!(harness.instances(&base).await.len(), 3);

    let cancelled: Vec<_> = harness
        .provider
        .events(CAL)
        .await
        .into_iter()
        .filter(|e| e.status == ProviderStatus::Cancelled)
        .collect();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].recurring_event_id, Some(base_pid));
    assert_eq!(cancelled[0].start.to_event_time(), Some(target.start_date));
}

#[rstest]
#[tokio::test]
async fn weekly_split_on_several_weekdays_keeps_rule_and_rows_in_step(harness: Harness) {
    let mut draft = weekly_draft(12);
    draft.recurrence = Some(Recurrence {
        rule: Some(vec!["RRULE:FREQ=WEEKLY;BYDAY=SU,WE,FR;COUNT=12".into()]),
        event_id: None,
    });
    harness
        .processor
        .process_change(&ChangeRequest::confirmed(draft, ApplyTo::ThisEvent))
        .await
        .unwrap();
    let base = harness.bases().await.remove(0);
    let instances = harness.instances(&base).await;
    assert_eq!(instances.len(), 4);

    let mut payload = instances[2].clone();
    payload.title = Some("Planning".into());
    harness
        .processor
        .process_change(&ChangeRequest::confirmed(payload, ApplyTo::ThisAndFollowingEvents))
        .await
        .unwrap();

    let reexpanded = |series: &Event| {
        let rule = RecurrenceRule::parse(series.rule().unwrap()).unwrap();
        expand(&rule, &series.start_date, &series.end_date, Some(&series.id))
            .unwrap()
            .len()
    };

    let old = harness
        .store
        .find_one(&Filter::by_id(CAL, &base.id))
        .await
        .unwrap()
        .expect("old base kept");
    assert_eq!(harness.instances(&old).await.len(), 2);
    assert_eq!(reexpanded(&old), 2);

    let new = harness
        .store
        .find_one(&Filter::by_id(CAL, &instances[2].id))
        .await
        .unwrap()
        .expect("new base written");
    assert_eq!(harness.instances(&new).await.len(), 1);
    assert_eq!(reexpanded(&new), 1);
}

#[rstest]
#[tokio::test]
async fn offline_provider_keeps_local_write_with_warning(harness: Harness) {
    harness.provider.set_offline(true);

    let change = ChangeRequest::confirmed(
        event("dentist", "Dentist", "2025-02-03T09:00:00+01:00", "2025-02-03T10:00:00+01:00"),
        ApplyTo::ThisEvent,
    );
    let summaries = harness.processor.process_change(&change).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].operation.to_string(), "REGULAR_CREATED");
    assert_eq!(summaries[0].warnings.len(), 1);

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].provider_event_id, None);
}

#[rstest]
#[tokio::test]
async fn failing_store_writes_nothing_anywhere(harness: Harness) {
    harness.store.set_failing(true);

    let change = ChangeRequest::confirmed(weekly_draft(3), ApplyTo::ThisEvent);
    let err = harness.processor.process_change(&change).await.unwrap_err();

    assert!(matches!(err, CompassError::Store(_)));
    assert!(harness.provider.events(CAL).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn batch_items_fail_independently(harness: Harness) {
    let mut invalid = event("bad", "Nowhere", "2025-02-03", "2025-02-03");
    invalid.calendar_id = String::new();

    let batch = vec![
        ChangeRequest::confirmed(event("a", "First", "2025-02-03", "2025-02-03"), ApplyTo::ThisEvent),
        ChangeRequest::confirmed(invalid, ApplyTo::ThisEvent),
        ChangeRequest::confirmed(event("b", "Third", "2025-02-04", "2025-02-04"), ApplyTo::ThisEvent),
    ];

    let results = harness.processor.process_batch(&batch).await;
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().unwrap_err().kind(),
        ErrorKind::Validation
    );
    assert!(results[2].is_ok());

    let summaries = harness.processor.process_events(batch).await;
    let titles: Vec<_> = summaries.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, ["First", "Third"]);
}

#[rstest]
#[tokio::test]
async fn concurrent_series_edits_leave_series_consistent(harness: Harness) {
    let base = harness.create_weekly(6).await;
    let instances = harness.instances(&base).await;

    let mut first = instances[0].clone();
    first.title = Some("One".into());
    let mut second = instances[1].clone();
    second.title = Some("Two".into());
    let first = ChangeRequest::confirmed(first, ApplyTo::AllEvents);
    let second = ChangeRequest::confirmed(second, ApplyTo::AllEvents);

    let (a, b) = tokio::join!(
        harness.processor.process_change(&first),
        harness.processor.process_change(&second),
    );
    a.unwrap();
    b.unwrap();

    let rows = harness.rows().await;
    assert_eq!(rows.len(), 7);
    let title = rows[0].title().to_string();
    assert!(title == "One" || title == "Two");
    assert!(rows.iter().all(|r| r.title() == title));
}

#[tokio::test]
async fn unknown_calendar_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let processor = SyncProcessor::new(store, ScopeResolver::new(52, vec![CAL.to_string()]));

    let mut payload = event("x", "Elsewhere", "2025-02-03", "2025-02-03");
    payload.calendar_id = "work".into();
    let err = processor
        .process_change(&ChangeRequest::confirmed(payload, ApplyTo::ThisEvent))
        .await
        .unwrap_err();
    assert!(matches!(err, CompassError::InvalidReference(id) if id == "work"));
}

#[tokio::test]
async fn file_store_runs_local_only() {
    let dir = tempfile::tempdir().unwrap();
    let processor = SyncProcessor::new(
        Arc::new(FileStore::new(dir.path())),
        ScopeResolver::default(),
    );

    let change = ChangeRequest::confirmed(weekly_draft(3), ApplyTo::ThisEvent);
    let summaries = processor.process_change(&change).await.unwrap();
    assert!(summaries[0].warnings.is_empty());

    // A fresh handle reads what the first one wrote
    let reopened = FileStore::new(dir.path());
    let rows = reopened.find(&Filter::calendar(CAL)).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.provider_event_id.is_none()));
}
