mod common;

use common::{fast_config, wait_until, wishlist_item, Harness};
use shelfwatch_core::{
    AvailabilityMonitor, ChangeEvent, ChangeListener, CheckOutcome, Clock, CoreError, GatewayError,
    ListType, NotificationKind, Preferences,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BRANCH: &str = "North Branch";

async fn track(h: &Harness, external_id: &str, title: &str) {
    h.lists
        .add_item(ListType::Wishlist, wishlist_item(external_id, title, &[BRANCH]))
        .await
        .unwrap();
}

fn events_of(outcome: CheckOutcome) -> Vec<ChangeEvent> {
    match outcome {
        CheckOutcome::Completed(events) => events,
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[derive(Default)]
struct RecordingListener {
    batches: Mutex<Vec<Vec<ChangeEvent>>>,
}

impl ChangeListener for RecordingListener {
    fn on_changes(&self, events: &[ChangeEvent]) {
        self.batches.lock().unwrap().push(events.to_vec());
    }
}

#[tokio::test]
async fn zero_to_two_raises_one_alert_and_steady_state_stays_quiet() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;

    h.availability.set("ol-1", BRANCH, 0);
    let first = events_of(h.poller.check_now().await.unwrap());
    assert!(first.is_empty());
    assert_eq!(h.poller.snapshots("ol-1")[BRANCH].available_count, 0);

    h.clock.advance(300_000);
    h.availability.set("ol-1", BRANCH, 2);
    let second = events_of(h.poller.check_now().await.unwrap());
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].previous_available, 0);
    assert_eq!(second[0].current_available, 2);
    assert!(second[0].is_significant());

    let notifications = h.center.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Availability);
    assert_eq!(
        notifications[0].message,
        "Good news! Dune is available at North Branch."
    );
    assert_eq!(h.center.unread_count(), 1);

    h.clock.advance(300_000);
    let third = events_of(h.poller.check_now().await.unwrap());
    assert!(third.is_empty());
    assert_eq!(h.center.notifications().len(), 1);
    let snapshot = &h.poller.snapshots("ol-1")[BRANCH];
    assert_eq!(snapshot.available_count, 2);
    assert_eq!(snapshot.observed_at_ms, h.clock.now_ms());
}

#[tokio::test]
async fn first_observation_compares_against_zero() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 2);

    let events = events_of(h.poller.check_now().await.unwrap());

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_available, 0);
    assert_eq!(h.center.unread_count(), 1);
}

#[tokio::test]
async fn small_increases_and_decreases_update_snapshots_silently() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;

    h.availability.set("ol-1", BRANCH, 1);
    let up = events_of(h.poller.check_now().await.unwrap());
    h.availability.set("ol-1", BRANCH, 0);
    let down = events_of(h.poller.check_now().await.unwrap());

    assert_eq!(up.len(), 1);
    assert!(!up[0].is_significant());
    assert_eq!(down.len(), 1);
    assert!(!down[0].is_significant());
    assert!(h.center.notifications().is_empty());
    assert_eq!(h.poller.snapshots("ol-1")[BRANCH].available_count, 0);
    let result = h.poller.status().last_result.unwrap();
    assert_eq!(result.changes_detected, 1);
    assert_eq!(result.notifications_eligible, 0);
}

#[tokio::test]
async fn unread_alert_for_same_item_and_location_is_not_duplicated() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;

    for available in [3, 0, 3] {
        h.availability.set("ol-1", BRANCH, available);
        h.poller.check_now().await.unwrap();
    }
    assert_eq!(h.center.notifications().len(), 1);

    let id = h.center.notifications()[0].id.clone();
    h.center.mark_as_read(&id).await.unwrap();
    for available in [0, 3] {
        h.availability.set("ol-1", BRANCH, available);
        h.poller.check_now().await.unwrap();
    }
    assert_eq!(h.center.notifications().len(), 2);
    assert_eq!(h.center.unread_count(), 1);
}

#[tokio::test]
async fn disabled_availability_alerts_still_update_snapshots() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.center.set_preferences(Preferences {
        availability_alerts: false,
        ..Preferences::default()
    });
    h.availability.set("ol-1", BRANCH, 4);

    let events = events_of(h.poller.check_now().await.unwrap());

    assert_eq!(events.len(), 1);
    assert!(h.center.notifications().is_empty());
    assert_eq!(h.poller.snapshots("ol-1")[BRANCH].available_count, 4);
}

#[tokio::test]
async fn overlapping_trigger_is_a_no_op() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 2);
    h.availability.hold();

    let poller = Arc::clone(&h.poller);
    let first = tokio::spawn(async move { poller.check_now().await });
    wait_until(|| h.availability.call_count() == 1).await;
    assert!(h.poller.status().running);

    let second = h.poller.check_now().await.unwrap();
    assert_eq!(second, CheckOutcome::Busy);
    assert_eq!(h.availability.call_count(), 1);

    h.availability.release();
    let events = events_of(first.await.unwrap().unwrap());
    assert_eq!(events.len(), 1);
    assert!(!h.poller.status().running);
}

#[tokio::test]
async fn stopping_mid_cycle_discards_its_results() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 5);
    h.availability.hold();

    let poller = Arc::clone(&h.poller);
    let cycle = tokio::spawn(async move { poller.check_now().await });
    wait_until(|| h.availability.call_count() == 1).await;
    h.poller.invalidate_in_flight();
    h.availability.release();

    assert_eq!(cycle.await.unwrap().unwrap(), CheckOutcome::Discarded);
    assert!(h.poller.snapshots("ol-1").is_empty());
    assert!(h.center.notifications().is_empty());
}

#[tokio::test]
async fn dropped_listener_discards_results() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 5);
    let listener = Arc::new(RecordingListener::default());
    h.poller.set_listener(&listener);
    drop(listener);

    let outcome = h.poller.check_now().await.unwrap();

    assert_eq!(outcome, CheckOutcome::Discarded);
    assert!(h.poller.snapshots("ol-1").is_empty());
}

#[tokio::test]
async fn listener_receives_every_change_of_a_cycle() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    track(&h, "ol-2", "Emma").await;
    h.availability.set("ol-1", BRANCH, 3);
    h.availability.set("ol-2", BRANCH, 1);
    let listener = Arc::new(RecordingListener::default());
    h.poller.set_listener(&listener);

    h.poller.check_now().await.unwrap();

    let batches = listener.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test]
async fn one_failing_item_does_not_abort_the_cycle() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    track(&h, "ol-2", "Emma").await;
    h.availability
        .fail("ol-1", GatewayError::transient("catalogue timeout"));
    h.availability.set("ol-2", BRANCH, 3);

    let events = events_of(h.poller.check_now().await.unwrap());

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].external_id, "ol-2");
    let result = h.poller.status().last_result.unwrap();
    assert_eq!(result.items_checked, 1);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn unauthorized_lookup_suspends_polling() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability
        .fail("ol-1", GatewayError::unauthorized("expired"));

    let first = h.poller.check_now().await;
    let second = h.poller.check_now().await;

    assert!(matches!(first, Err(CoreError::Unauthorized(_))));
    assert!(matches!(second, Err(CoreError::SessionSuspended)));
    assert_eq!(h.availability.call_count(), 1);
    assert!(h.poller.status().last_error.is_some());
}

#[tokio::test]
async fn snapshots_of_untracked_items_are_pruned() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 1);
    h.poller.check_now().await.unwrap();
    assert!(!h.poller.snapshots("ol-1").is_empty());

    h.lists.remove_item(ListType::Wishlist, "ol-1").await.unwrap();
    h.poller.check_now().await.unwrap();

    assert!(h.poller.snapshots("ol-1").is_empty());
}

#[tokio::test]
async fn forget_item_drops_snapshots() {
    let h = Harness::new();
    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 1);
    h.poller.check_now().await.unwrap();

    h.poller.forget_item("ol-1");

    assert!(h.poller.snapshots("ol-1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn monitor_runs_only_while_tracked_items_exist() {
    let h = Harness::new();
    let monitor = AvailabilityMonitor::new(Arc::clone(&h.poller), &fast_config());

    monitor.reconcile_schedule();
    assert!(!monitor.is_scheduled());

    track(&h, "ol-1", "Dune").await;
    h.availability.set("ol-1", BRANCH, 0);
    monitor.reconcile_schedule();
    assert!(monitor.is_scheduled());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.availability.call_count(), 1);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(h.availability.call_count() >= 2);

    monitor.set_enabled(false);
    assert!(!monitor.is_scheduled());
    let calls = h.availability.call_count();
    tokio::time::sleep(Duration::from_secs(900)).await;
    assert_eq!(h.availability.call_count(), calls);

    monitor.set_enabled(true);
    assert!(monitor.is_scheduled());
    h.lists.remove_item(ListType::Wishlist, "ol-1").await.unwrap();
    monitor.reconcile_schedule();
    assert!(!monitor.is_scheduled());
}
