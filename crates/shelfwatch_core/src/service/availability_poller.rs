//! Differential stock polling for tracked wishlist items.
//!
//! # Responsibility
//! - Compare current stock per tracked location with the last snapshot.
//! - Persist snapshots and hand change events to the notification side.
//! - Keep the periodic schedule aligned with "monitoring enabled and at
//!   least one tracked item".
//!
//! # Invariants
//! - At most one cycle runs at a time; overlapping triggers are no-ops.
//! - Items are polled sequentially with a fixed pause between lookups.
//! - Snapshots are updated on every detected count, significant or not.
//! - Results of a cycle are dropped when the poller was stopped or its
//!   listener went away while the cycle was in flight.

use crate::capability::{Clock, LocationProvider};
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::gateway::AvailabilitySource;
use crate::logging::loggable;
use crate::model::availability::{ChangeEvent, ItemSnapshots, LocationAvailability, TrackingSnapshot};
use crate::model::book::BookItem;
use crate::schedule::{Job, ScheduledTask, SingleFlight};
use crate::service::list_store::ListStore;
use crate::session::SessionGate;
use crate::storage::{
    load_or_default, lock, save_json, tracking_key, Storage, TRACKING_PREFIX,
};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

const MODULE: &str = "availability";

/// Consumer of per-cycle change events.
pub trait ChangeListener: Send + Sync {
    fn on_changes(&self, events: &[ChangeEvent]);
}

/// Counters of one finished cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    pub items_checked: usize,
    pub changes_detected: usize,
    pub notifications_eligible: usize,
    pub errors: Vec<String>,
}

/// Observable poller state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStatus {
    /// A cycle is executing right now.
    pub running: bool,
    pub last_started_at_ms: Option<i64>,
    pub last_completed_at_ms: Option<i64>,
    pub last_duration_ms: Option<i64>,
    pub last_result: Option<CycleResult>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Cycle finished and its results were applied.
    Completed(Vec<ChangeEvent>),
    /// Another cycle was already in flight; nothing was requested.
    Busy,
    /// Cycle finished after the poller was stopped or its listener dropped.
    Discarded,
}

/// One-cycle-at-a-time differential stock poller.
pub struct AvailabilityPoller {
    lists: Arc<ListStore>,
    source: Arc<dyn AvailabilitySource>,
    location: Arc<dyn LocationProvider>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    session: Arc<SessionGate>,
    listener: Mutex<Option<Weak<dyn ChangeListener>>>,
    flight: SingleFlight,
    epoch: AtomicU64,
    inter_item_delay: Duration,
    max_items_per_cycle: usize,
    status: Mutex<MonitorStatus>,
}

impl AvailabilityPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lists: Arc<ListStore>,
        source: Arc<dyn AvailabilitySource>,
        location: Arc<dyn LocationProvider>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        session: Arc<SessionGate>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            lists,
            source,
            location,
            storage,
            clock,
            session,
            listener: Mutex::new(None),
            flight: SingleFlight::new(),
            epoch: AtomicU64::new(0),
            inter_item_delay: config.inter_item_delay(),
            max_items_per_cycle: config.max_items_per_cycle,
            status: Mutex::new(MonitorStatus::default()),
        }
    }

    /// Registers the consumer of change events. Held weakly.
    pub fn set_listener<L: ChangeListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn ChangeListener> = Arc::downgrade(listener) as Weak<dyn ChangeListener>;
        *lock(&self.listener) = Some(weak);
    }

    pub fn status(&self) -> MonitorStatus {
        lock(&self.status).clone()
    }

    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Invalidates any cycle currently in flight.
    pub fn invalidate_in_flight(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Last known snapshots of one item.
    pub fn snapshots(&self, external_id: &str) -> ItemSnapshots {
        load_or_default(self.storage.as_ref(), &tracking_key(external_id))
    }

    /// Drops every snapshot of an item.
    pub fn forget_item(&self, external_id: &str) {
        if let Err(err) = self.storage.remove(&tracking_key(external_id)) {
            error!(
                "event=snapshot_forget module={} status=error external_id={} error={}",
                MODULE, external_id, err
            );
        }
    }

    /// Runs one cycle now, unless one is already in flight.
    pub async fn check_now(&self) -> CoreResult<CheckOutcome> {
        let Some(_flight) = self.flight.try_enter() else {
            debug!("event=availability_cycle module={} status=skip reason=busy", MODULE);
            return Ok(CheckOutcome::Busy);
        };
        self.session.ensure_active()?;

        let epoch = self.epoch.load(Ordering::SeqCst);
        let started_at = self.clock.now_ms();
        {
            let mut status = lock(&self.status);
            status.running = true;
            status.last_started_at_ms = Some(started_at);
        }
        info!("event=availability_cycle module={} status=start", MODULE);

        let outcome = self.run_cycle(epoch).await;
        let finished_at = self.clock.now_ms();
        let mut status = lock(&self.status);
        status.running = false;
        status.last_completed_at_ms = Some(finished_at);
        status.last_duration_ms = Some(finished_at - started_at);
        match &outcome {
            Ok((CheckOutcome::Completed(_), result)) => {
                info!(
                    "event=availability_cycle module={} status=ok items_checked={} changes={} eligible={} errors={}",
                    MODULE,
                    result.items_checked,
                    result.changes_detected,
                    result.notifications_eligible,
                    result.errors.len()
                );
                status.last_result = Some(result.clone());
                status.last_error = None;
            }
            Ok((_, _)) => {
                info!("event=availability_cycle module={} status=skip reason=stale", MODULE);
            }
            Err(err) => {
                status.last_error = Some(err.to_string());
            }
        }
        outcome.map(|(outcome, _)| outcome)
    }

    async fn run_cycle(&self, epoch: u64) -> CoreResult<(CheckOutcome, CycleResult)> {
        let tracked = self.lists.tracked_wishlist_items();
        self.prune_untracked(&tracked);

        let mut result = CycleResult::default();
        let batch: Vec<&BookItem> = tracked.iter().take(self.max_items_per_cycle).collect();
        if batch.is_empty() {
            return Ok((CheckOutcome::Completed(Vec::new()), result));
        }

        let position = self.location.current_position().await;
        let (lat, lon) = match position {
            Some(coords) => (Some(coords.lat), Some(coords.lon)),
            None => (None, None),
        };

        let mut staged: Vec<(String, ItemSnapshots)> = Vec::with_capacity(batch.len());
        let mut events: Vec<ChangeEvent> = Vec::new();
        for (index, item) in batch.iter().enumerate() {
            if index > 0 && !self.inter_item_delay.is_zero() {
                tokio::time::sleep(self.inter_item_delay).await;
            }
            let report = match self
                .source
                .get_availability(&item.external_id, lat, lon)
                .await
            {
                Ok(report) => report,
                Err(err) if err.is_unauthorized() => {
                    return Err(self.session.suspend(MODULE, err));
                }
                Err(err) => {
                    warn!(
                        "event=availability_lookup module={} status=error external_id={} error_kind={} error={}",
                        MODULE,
                        item.external_id,
                        err.kind.as_str(),
                        loggable(&err.message)
                    );
                    result
                        .errors
                        .push(format!("{}: {}", item.external_id, err.message));
                    continue;
                }
            };
            result.items_checked += 1;

            let now = self.clock.now_ms();
            let mut snapshots = self.snapshots(&item.external_id);
            snapshots.retain(|location, _| item.tracked_locations.contains(location));
            for location in &item.tracked_locations {
                let Some(current) = find_location(&report, location) else {
                    continue;
                };
                let previous = snapshots
                    .get(location)
                    .map_or(0, |snapshot| snapshot.available_count);
                if previous != current.available_count {
                    events.push(ChangeEvent {
                        external_id: item.external_id.clone(),
                        title: item.title.clone(),
                        location: location.clone(),
                        previous_available: previous,
                        current_available: current.available_count,
                        timestamp_ms: now,
                    });
                }
                snapshots.insert(
                    location.clone(),
                    TrackingSnapshot {
                        available_count: current.available_count,
                        observed_at_ms: now,
                    },
                );
            }
            staged.push((item.external_id.clone(), snapshots));
        }

        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Ok((CheckOutcome::Discarded, result));
        }
        let listener = match lock(&self.listener).as_ref() {
            Some(weak) => match weak.upgrade() {
                Some(listener) => Some(listener),
                None => return Ok((CheckOutcome::Discarded, result)),
            },
            None => None,
        };

        for (external_id, snapshots) in &staged {
            if let Err(err) = save_json(self.storage.as_ref(), &tracking_key(external_id), snapshots)
            {
                error!(
                    "event=snapshot_persist module={} status=error external_id={} error={}",
                    MODULE, external_id, err
                );
            }
        }

        result.changes_detected = events.len();
        result.notifications_eligible = events.iter().filter(|event| event.is_significant()).count();
        if let Some(listener) = listener {
            if !events.is_empty() {
                listener.on_changes(&events);
            }
        }
        Ok((CheckOutcome::Completed(events), result))
    }

    /// Removes snapshot namespaces of items that are no longer tracked.
    fn prune_untracked(&self, tracked: &[BookItem]) {
        let live: HashSet<String> = tracked
            .iter()
            .map(|item| tracking_key(&item.external_id))
            .collect();
        let keys = match self.storage.keys_with_prefix(TRACKING_PREFIX) {
            Ok(keys) => keys,
            Err(err) => {
                error!(
                    "event=snapshot_prune module={} status=error error={}",
                    MODULE, err
                );
                return;
            }
        };
        for key in keys.into_iter().filter(|key| !live.contains(key)) {
            debug!("event=snapshot_prune module={} status=ok key={}", MODULE, key);
            if let Err(err) = self.storage.remove(&key) {
                error!(
                    "event=snapshot_prune module={} status=error key={} error={}",
                    MODULE, key, err
                );
            }
        }
    }
}

fn find_location<'a>(
    report: &'a [LocationAvailability],
    location: &str,
) -> Option<&'a LocationAvailability> {
    report
        .iter()
        .find(|entry| entry.location.trim().eq_ignore_ascii_case(location.trim()))
}

struct AvailabilityJob {
    poller: Arc<AvailabilityPoller>,
}

#[async_trait]
impl Job for AvailabilityJob {
    fn name(&self) -> &'static str {
        "availability_monitor"
    }

    async fn run(&self) {
        if self.poller.session.is_suspended() {
            debug!("event=availability_tick module={} status=skip reason=suspended", MODULE);
            return;
        }
        if let Err(err) = self.poller.check_now().await {
            warn!(
                "event=availability_tick module={} status=error error={}",
                MODULE, err
            );
        }
    }
}

/// Timer-driven wrapper keeping the poller scheduled only while useful.
pub struct AvailabilityMonitor {
    poller: Arc<AvailabilityPoller>,
    task: ScheduledTask,
    enabled: AtomicBool,
}

impl AvailabilityMonitor {
    pub fn new(poller: Arc<AvailabilityPoller>, config: &CoreConfig) -> Self {
        let job = Arc::new(AvailabilityJob {
            poller: Arc::clone(&poller),
        });
        Self {
            task: ScheduledTask::new(
                job,
                config.availability_interval(),
                config.availability_initial_delay(),
            ),
            poller,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn poller(&self) -> &Arc<AvailabilityPoller> {
        &self.poller
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self) -> bool {
        self.task.is_running()
    }

    /// Enables or disables monitoring and re-evaluates the schedule.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.reconcile_schedule();
    }

    /// Starts or stops the timer so it runs only when monitoring is enabled,
    /// the session is active and some wishlist item has tracked locations.
    pub fn reconcile_schedule(&self) {
        let wanted = self.is_enabled()
            && !self.poller.session.is_suspended()
            && self.poller.lists.has_tracked_items();
        if wanted {
            self.task.start();
        } else if self.task.is_running() {
            self.stop();
        }
    }

    /// Stops the timer; a cycle in flight finishes but its results are dropped.
    pub fn stop(&self) {
        self.task.stop();
        self.poller.invalidate_in_flight();
    }

    /// Manual trigger outside the timer, still single-flight.
    pub async fn check_now(&self) -> CoreResult<CheckOutcome> {
        self.poller.check_now().await
    }
}
