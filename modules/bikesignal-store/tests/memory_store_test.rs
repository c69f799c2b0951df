//! MemorySignalStore behavior. No database required.

use std::collections::BTreeSet;

use bikesignal_common::{
    GeoBounds, GeoPoint, NewReport, ReportLocation, ReportStatus, ReporterId, SignalError,
};
use bikesignal_store::{CandidateQuery, MemorySignalStore, SignalStore};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

fn new_report(reporter: &str, created_at: DateTime<Utc>) -> NewReport {
    NewReport::builder()
        .location(ReportLocation::new(52.3676, 4.9041, 5.0))
        .tags(vec!["flat_tires".to_string()])
        .reporter(ReporterId::from_key(reporter).unwrap())
        .created_at(created_at)
        .build()
}

async fn seeded(n: usize) -> (MemorySignalStore, i64) {
    let store = MemorySignalStore::new();
    let group = store
        .create_bike_group(GeoPoint::new(52.3676, 4.9041), t0())
        .await
        .unwrap();
    for i in 0..n {
        store
            .insert_report(&new_report("anon:x", t0() + Duration::hours(i as i64)), group.id)
            .await
            .unwrap();
    }
    (store, group.id)
}

fn ids(values: &[i64]) -> BTreeSet<i64> {
    values.iter().copied().collect()
}

#[tokio::test]
async fn inserted_reports_start_new_with_public_id() {
    let (store, group_id) = seeded(1).await;
    let report = store.report(1).await.unwrap().unwrap();

    assert_eq!(report.status, ReportStatus::New);
    assert_eq!(report.bike_group_id, group_id);
    assert_eq!(report.public_id.len(), 8);
    assert!(report.dedupe_group_id.is_none());
}

#[tokio::test]
async fn reports_in_group_are_chronological() {
    let store = MemorySignalStore::new();
    let group = store
        .create_bike_group(GeoPoint::new(52.3676, 4.9041), t0())
        .await
        .unwrap();
    // Inserted out of order
    store
        .insert_report(&new_report("anon:x", t0() + Duration::days(2)), group.id)
        .await
        .unwrap();
    store
        .insert_report(&new_report("anon:y", t0()), group.id)
        .await
        .unwrap();

    let history = store.reports_in_group(group.id).await.unwrap();
    assert_eq!(history.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
}

#[tokio::test]
async fn candidate_query_applies_window_status_and_bounds() {
    let (store, _) = seeded(3).await;
    store
        .transition_status(2, ReportStatus::Invalid, t0())
        .await
        .unwrap();

    let query = CandidateQuery::builder()
        .created_since(t0() + Duration::minutes(30))
        .statuses(ReportStatus::OPEN.to_vec())
        .bounds(GeoBounds::around(GeoPoint::new(52.3676, 4.9041), 15.0))
        .build();
    let found = store.candidate_reports(&query).await.unwrap();
    assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3]);

    let far = CandidateQuery::builder()
        .created_since(t0())
        .statuses(ReportStatus::OPEN.to_vec())
        .bounds(GeoBounds::around(GeoPoint::new(48.8566, 2.3522), 15.0))
        .build();
    assert!(store.candidate_reports(&far).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_reports_is_newest_first() {
    let (store, _) = seeded(3).await;
    let all = store.list_reports(None).await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2, 1]);

    store
        .transition_status(1, ReportStatus::Triaged, t0())
        .await
        .unwrap();
    let triaged = store.list_reports(Some(ReportStatus::Triaged)).await.unwrap();
    assert_eq!(triaged.len(), 1);
    assert_eq!(triaged[0].id, 1);
}

#[tokio::test]
async fn transition_status_validates_lifecycle() {
    let (store, _) = seeded(1).await;

    let change = store
        .transition_status(1, ReportStatus::Triaged, t0() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(change.from, ReportStatus::New);
    assert_eq!(change.report.status, ReportStatus::Triaged);
    assert_eq!(change.report.updated_at, t0() + Duration::days(1));

    let err = store
        .transition_status(1, ReportStatus::New, t0())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SignalError::InvalidTransition {
            from: ReportStatus::Triaged,
            to: ReportStatus::New
        }
    ));

    let err = store
        .transition_status(99, ReportStatus::Triaged, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::ReportNotFound(99)));
}

#[tokio::test]
async fn update_bike_group_keeps_anchor() {
    let (store, group_id) = seeded(0).await;
    let mut group = store.bike_group(group_id).await.unwrap().unwrap();
    group.anchor = GeoPoint::new(0.0, 0.0);
    group.total_reports = 4;

    store.update_bike_group(&group).await.unwrap();

    let stored = store.bike_group(group_id).await.unwrap().unwrap();
    assert_eq!(stored.total_reports, 4);
    assert_eq!(stored.anchor, GeoPoint::new(52.3676, 4.9041));
}

#[tokio::test]
async fn merge_unions_and_reports_only_new_members() {
    let (store, _) = seeded(4).await;

    let first = store
        .merge_reports(1, &ids(&[2, 3]), "operator@example.org", t0())
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.newly_merged, ids(&[2, 3]));

    let second = store
        .merge_reports(1, &ids(&[2, 4]), "other@example.org", t0())
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.group.id, first.group.id);
    assert_eq!(second.newly_merged, ids(&[4]));
    assert_eq!(second.group.members(), ids(&[1, 2, 3, 4]));
    assert_eq!(second.group.created_by, "operator@example.org");

    for id in 1..=4 {
        let report = store.report(id).await.unwrap().unwrap();
        assert_eq!(report.dedupe_group_id, Some(first.group.id));
    }
}

#[tokio::test]
async fn merge_with_unknown_id_changes_nothing() {
    let (store, _) = seeded(3).await;

    let err = store
        .merge_reports(1, &ids(&[2, 77]), "op", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::DuplicateNotFound(77)));

    let err = store
        .merge_reports(55, &ids(&[2]), "op", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, SignalError::CanonicalNotFound(55)));

    assert!(store.dedupe_group_for(1).await.unwrap().is_none());
    assert!(store.report(2).await.unwrap().unwrap().dedupe_group_id.is_none());
}
