//! Unified notification list with optimistic read/delete and remote merge.
//!
//! # Responsibility
//! - Hold one most-recent-first list of local and server notifications.
//! - Turn significant availability changes and near due dates into local
//!   alerts, gated by the user's preferences.
//! - Mirror read/delete actions to the notification gateway with rollback.
//!
//! # Invariants
//! - Read and delete flips are visible before the remote call starts.
//! - A refresh keeps every local-origin entry the server does not know.
//! - A notification id is pushed to the device at most once.

use crate::capability::{Clock, PushNotifier};
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::gateway::{GatewayError, GatewayErrorKind, NotificationGateway};
use crate::logging::loggable;
use crate::model::availability::ChangeEvent;
use crate::model::book::{BookItem, ListType};
use crate::model::notification::{Notification, NotificationKind};
use crate::model::preferences::{PermissionState, Preferences};
use crate::schedule::{Job, SingleFlight};
use crate::service::availability_poller::ChangeListener;
use crate::service::list_store::ListStore;
use crate::session::SessionGate;
use crate::storage::{
    load_or_default, lock, save_json, Storage, NOTIFICATIONS_KEY, PERMISSION_KEY, PREFERENCES_KEY,
};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

const MODULE: &str = "notifications";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { count: usize },
    /// A refresh was already in flight.
    Busy,
    /// Remote list could not be fetched; local state is unchanged.
    Failed,
    /// The center was invalidated while the fetch was in flight; the
    /// answer was dropped.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Marked,
    AlreadyRead,
    NotFound,
    /// Remote call failed and the flip was rolled back.
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Remote call failed and the entry was restored.
    Restored,
}

/// Use-case service over the notification list.
pub struct NotificationCenter {
    gateway: Arc<dyn NotificationGateway>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    push: Arc<dyn PushNotifier>,
    session: Arc<SessionGate>,
    state: watch::Sender<Vec<Notification>>,
    preferences: Mutex<Preferences>,
    permission: Mutex<PermissionState>,
    delivered: Mutex<HashSet<String>>,
    /// Due-soon keys already raised in this session, including cleared ones.
    raised_due: Mutex<HashSet<String>>,
    refresh_flight: SingleFlight,
    /// Bumped on shutdown; fetches started under an older value are dropped.
    epoch: AtomicU64,
    due_soon_window_ms: i64,
}

impl NotificationCenter {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        push: Arc<dyn PushNotifier>,
        session: Arc<SessionGate>,
        config: &CoreConfig,
    ) -> Self {
        let (state, _) = watch::channel(Vec::new());
        Self {
            gateway,
            storage,
            clock,
            push,
            session,
            state,
            preferences: Mutex::new(Preferences::default()),
            permission: Mutex::new(PermissionState::Default),
            delivered: Mutex::new(HashSet::new()),
            raised_due: Mutex::new(HashSet::new()),
            refresh_flight: SingleFlight::new(),
            epoch: AtomicU64::new(0),
            due_soon_window_ms: config.due_soon_window_ms(),
        }
    }

    /// Restores notifications, preferences and permission from the cache.
    ///
    /// Restored entries count as already delivered.
    pub fn load(&self) {
        let mut cached: Vec<Notification> =
            load_or_default(self.storage.as_ref(), NOTIFICATIONS_KEY);
        let mut seen = HashSet::new();
        cached.retain(|notification| seen.insert(notification.id.clone()));
        sort_recent_first(&mut cached);

        *lock(&self.preferences) = load_or_default(self.storage.as_ref(), PREFERENCES_KEY);
        let stored: PermissionState = load_or_default(self.storage.as_ref(), PERMISSION_KEY);
        *lock(&self.permission) = match stored {
            PermissionState::Default => self.push.permission(),
            decided => decided,
        };

        *lock(&self.delivered) = seen;
        lock(&self.raised_due).extend(
            cached
                .iter()
                .filter(|n| n.kind == NotificationKind::DueSoon)
                .filter_map(|n| n.dedup_key.clone()),
        );
        info!(
            "event=notifications_load module={} status=ok items={}",
            MODULE,
            cached.len()
        );
        self.state.send_replace(cached);
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.state.subscribe()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state
            .borrow()
            .iter()
            .filter(|notification| !notification.is_read)
            .count()
    }

    pub fn preferences(&self) -> Preferences {
        *lock(&self.preferences)
    }

    pub fn set_preferences(&self, preferences: Preferences) {
        *lock(&self.preferences) = preferences;
        if let Err(err) = save_json(self.storage.as_ref(), PREFERENCES_KEY, &preferences) {
            error!(
                "event=preferences_persist module={} status=error error={}",
                MODULE, err
            );
        }
        info!(
            "event=preferences_update module={} status=ok push={} availability={} hold_ready={} due_soon={}",
            MODULE,
            preferences.push_notifications,
            preferences.availability_alerts,
            preferences.hold_ready_alerts,
            preferences.due_soon_alerts
        );
    }

    pub fn permission(&self) -> PermissionState {
        *lock(&self.permission)
    }

    /// Prompts for push permission once; a decided state is returned as is.
    pub async fn request_push_permission(&self) -> PermissionState {
        let current = self.permission();
        if current != PermissionState::Default {
            return current;
        }
        let decided = self.push.request_permission().await;
        *lock(&self.permission) = decided;
        if let Err(err) = save_json(self.storage.as_ref(), PERMISSION_KEY, &decided) {
            error!(
                "event=permission_persist module={} status=error error={}",
                MODULE, err
            );
        }
        info!(
            "event=push_permission module={} status=ok state={:?}",
            MODULE, decided
        );
        decided
    }

    /// Drops the result of any refresh currently waiting on the server.
    pub fn invalidate_in_flight(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Replaces the list with the server's view plus unknown local entries.
    pub async fn refresh(&self) -> CoreResult<RefreshOutcome> {
        let Some(_flight) = self.refresh_flight.try_enter() else {
            debug!("event=notifications_refresh module={} status=skip reason=busy", MODULE);
            return Ok(RefreshOutcome::Busy);
        };
        self.session.ensure_active()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let fetched = self.gateway.list(false).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            info!(
                "event=notifications_refresh module={} status=skip reason=invalidated",
                MODULE
            );
            return Ok(RefreshOutcome::Discarded);
        }
        let remote = match fetched {
            Ok(remote) => remote,
            Err(err) if err.is_unauthorized() => return Err(self.session.suspend(MODULE, err)),
            Err(err) => {
                self.log_remote_failure("refresh", "all", &err);
                return Ok(RefreshOutcome::Failed);
            }
        };

        let mut merged: Vec<Notification> = remote.into_iter().map(Notification::from).collect();
        let remote_ids: HashSet<String> = merged.iter().map(|n| n.id.clone()).collect();
        merged.extend(
            self.notifications()
                .into_iter()
                .filter(|n| n.is_local() && !remote_ids.contains(&n.id)),
        );
        sort_recent_first(&mut merged);
        let count = merged.len();
        self.state.send_replace(merged);
        self.persist();
        self.deliver_new();
        info!(
            "event=notifications_refresh module={} status=ok items={} unread={}",
            MODULE,
            count,
            self.unread_count()
        );
        Ok(RefreshOutcome::Refreshed { count })
    }

    /// Marks one notification read, rolling back when the server refuses.
    pub async fn mark_as_read(&self, id: &str) -> CoreResult<ReadOutcome> {
        let mut found = false;
        let mut already = false;
        self.state.send_if_modified(|list| {
            match list.iter_mut().find(|n| n.id == id) {
                Some(notification) if notification.is_read => {
                    found = true;
                    already = true;
                    false
                }
                Some(notification) => {
                    found = true;
                    notification.is_read = true;
                    true
                }
                None => false,
            }
        });
        if !found {
            return Ok(ReadOutcome::NotFound);
        }
        if already {
            return Ok(ReadOutcome::AlreadyRead);
        }
        self.persist();

        let Some(remote_id) = self.remote_id_of(id) else {
            return Ok(ReadOutcome::Marked);
        };
        let result = match self.session.ensure_active() {
            Ok(()) => self.gateway.mark_read(remote_id).await,
            Err(err) => {
                self.set_read(id, false);
                return Err(err);
            }
        };
        match result {
            Ok(()) => Ok(ReadOutcome::Marked),
            Err(err) => {
                self.set_read(id, false);
                if err.is_unauthorized() {
                    return Err(self.session.suspend(MODULE, err));
                }
                self.log_remote_failure("mark_read", id, &err);
                Ok(ReadOutcome::RolledBack)
            }
        }
    }

    /// Marks everything read; on remote failure the list is refetched.
    pub async fn mark_all_as_read(&self) -> CoreResult<()> {
        self.state.send_if_modified(|list| {
            let mut changed = false;
            for notification in list.iter_mut().filter(|n| !n.is_read) {
                notification.is_read = true;
                changed = true;
            }
            changed
        });
        self.persist();
        self.session.ensure_active()?;

        match self.gateway.mark_all_read().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unauthorized() => Err(self.session.suspend(MODULE, err)),
            Err(err) => {
                self.log_remote_failure("mark_all_read", "all", &err);
                self.refresh().await.map(|_| ())
            }
        }
    }

    /// Deletes one notification, restoring it when the server refuses.
    pub async fn delete_notification(&self, id: &str) -> CoreResult<DeleteOutcome> {
        let mut removed: Option<(usize, Notification)> = None;
        self.state.send_if_modified(|list| {
            match list.iter().position(|n| n.id == id) {
                Some(index) => {
                    removed = Some((index, list.remove(index)));
                    true
                }
                None => false,
            }
        });
        let Some((index, entry)) = removed else {
            return Ok(DeleteOutcome::NotFound);
        };
        self.persist();

        let Some(remote_id) = entry.remote_id() else {
            return Ok(DeleteOutcome::Deleted);
        };
        let result = match self.session.ensure_active() {
            Ok(()) => self.gateway.delete(remote_id).await,
            Err(err) => {
                self.restore(index, entry);
                return Err(err);
            }
        };
        match result {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(err) if err.kind == GatewayErrorKind::NotFound => Ok(DeleteOutcome::Deleted),
            Err(err) => {
                self.restore(index, entry);
                if err.is_unauthorized() {
                    return Err(self.session.suspend(MODULE, err));
                }
                self.log_remote_failure("delete", id, &err);
                Ok(DeleteOutcome::Restored)
            }
        }
    }

    /// Empties the list locally and marks everything read remotely.
    ///
    /// Remote records are not deleted; a later refresh brings them back as
    /// read. Returns `false` when the list was restored after a failure.
    pub async fn clear_all(&self) -> CoreResult<bool> {
        let previous = self.state.send_replace(Vec::new());
        self.persist();
        if !previous.iter().any(|n| n.remote_id().is_some()) {
            return Ok(true);
        }

        let result = match self.session.ensure_active() {
            Ok(()) => self.gateway.mark_all_read().await,
            Err(err) => {
                self.restore_all(previous);
                return Err(err);
            }
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) => {
                self.restore_all(previous);
                if err.is_unauthorized() {
                    return Err(self.session.suspend(MODULE, err));
                }
                self.log_remote_failure("clear_all", "all", &err);
                Ok(false)
            }
        }
    }

    /// Raises local alerts for significant availability increases.
    ///
    /// Returns the number of notifications added.
    pub fn handle_changes(&self, events: &[ChangeEvent]) -> usize {
        if !self.preferences().availability_alerts {
            debug!(
                "event=availability_alert module={} status=skip reason=disabled events={}",
                MODULE,
                events.len()
            );
            return 0;
        }
        let now = self.clock.now_ms();
        let fresh: Vec<Notification> = {
            let current = self.state.borrow();
            events
                .iter()
                .filter(|event| event.is_significant())
                .filter(|event| {
                    let key = availability_key(&event.external_id, &event.location);
                    !current
                        .iter()
                        .any(|n| !n.is_read && n.dedup_key.as_deref() == Some(key.as_str()))
                })
                .map(|event| availability_alert(event, now))
                .collect()
        };
        self.prepend(fresh)
    }

    /// Raises one due-soon alert per item and due date inside the window.
    pub fn check_due_dates(&self, items: &[BookItem]) -> usize {
        if !self.preferences().due_soon_alerts {
            return 0;
        }
        let now = self.clock.now_ms();
        let fresh: Vec<Notification> = {
            let mut raised = lock(&self.raised_due);
            items
                .iter()
                .filter(|item| item.list == ListType::Reading)
                .filter_map(|item| item.due_date.map(|due| (item, due)))
                .filter(|(_, due)| *due >= now && *due - now <= self.due_soon_window_ms)
                .filter(|(item, due)| raised.insert(due_key(&item.external_id, *due)))
                .map(|(item, due)| due_soon_alert(item, due, now))
                .collect()
        };
        self.prepend(fresh)
    }

    fn prepend(&self, fresh: Vec<Notification>) -> usize {
        let added = fresh.len();
        if added == 0 {
            return 0;
        }
        self.state.send_modify(|list| {
            let mut merged = fresh;
            merged.append(list);
            sort_recent_first(&mut merged);
            *list = merged;
        });
        self.persist();
        self.deliver_new();
        info!(
            "event=local_alert module={} status=ok added={} unread={}",
            MODULE,
            added,
            self.unread_count()
        );
        added
    }

    /// Pushes every unread, not yet delivered notification whose category
    /// is enabled. Ids seen here are never pushed again.
    fn deliver_new(&self) {
        let preferences = self.preferences();
        let push_allowed =
            preferences.push_notifications && self.permission() == PermissionState::Granted;
        let pending: Vec<Notification> = {
            let mut delivered = lock(&self.delivered);
            self.state
                .borrow()
                .iter()
                .filter(|n| delivered.insert(n.id.clone()))
                .filter(|n| push_allowed && !n.is_read && preferences.allows(n.kind))
                .cloned()
                .collect()
        };
        for notification in pending {
            match self.push.deliver(&notification) {
                Ok(()) => debug!(
                    "event=push_deliver module={} status=ok id={}",
                    MODULE, notification.id
                ),
                Err(err) => warn!(
                    "event=push_deliver module={} status=error id={} error={}",
                    MODULE, notification.id, err
                ),
            }
        }
    }

    fn remote_id_of(&self, id: &str) -> Option<u64> {
        self.state
            .borrow()
            .iter()
            .find(|n| n.id == id)
            .and_then(Notification::remote_id)
    }

    fn set_read(&self, id: &str, is_read: bool) {
        self.state.send_if_modified(|list| {
            match list.iter_mut().find(|n| n.id == id) {
                Some(notification) if notification.is_read != is_read => {
                    notification.is_read = is_read;
                    true
                }
                _ => false,
            }
        });
        self.persist();
    }

    fn restore(&self, index: usize, entry: Notification) {
        self.state.send_modify(|list| {
            if list.iter().all(|n| n.id != entry.id) {
                let index = index.min(list.len());
                list.insert(index, entry);
            }
        });
        self.persist();
    }

    /// Puts back a cleared list, keeping entries that arrived meanwhile.
    fn restore_all(&self, previous: Vec<Notification>) {
        self.state.send_modify(|list| {
            let known: HashSet<String> = list.iter().map(|n| n.id.clone()).collect();
            list.extend(previous.into_iter().filter(|n| !known.contains(&n.id)));
            sort_recent_first(list);
        });
        self.persist();
    }

    fn log_remote_failure(&self, operation: &str, subject: &str, err: &GatewayError) {
        warn!(
            "event=notifications_{} module={} status=error subject={} error_kind={} error={}",
            operation,
            MODULE,
            subject,
            err.kind.as_str(),
            loggable(&err.message)
        );
    }

    fn persist(&self) {
        let list = self.notifications();
        if let Err(err) = save_json(self.storage.as_ref(), NOTIFICATIONS_KEY, &list) {
            error!(
                "event=notifications_persist module={} status=error error={}",
                MODULE, err
            );
        }
    }
}

impl ChangeListener for NotificationCenter {
    fn on_changes(&self, events: &[ChangeEvent]) {
        self.handle_changes(events);
    }
}

fn sort_recent_first(list: &mut [Notification]) {
    list.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
}

fn availability_key(external_id: &str, location: &str) -> String {
    format!("availability:{external_id}:{location}")
}

fn due_key(external_id: &str, due_date_ms: i64) -> String {
    format!("due_soon:{external_id}:{due_date_ms}")
}

fn availability_alert(event: &ChangeEvent, now: i64) -> Notification {
    let mut notification = Notification::local(
        NotificationKind::Availability,
        format!("{} is now available", event.title),
        format!(
            "Good news! {} is available at {}.",
            event.title, event.location
        ),
        now,
    );
    notification.external_id = Some(event.external_id.clone());
    notification.location = Some(event.location.clone());
    notification.dedup_key = Some(availability_key(&event.external_id, &event.location));
    notification
}

fn due_soon_alert(item: &BookItem, due_date_ms: i64, now: i64) -> Notification {
    let days = (due_date_ms - now + DAY_MS - 1) / DAY_MS;
    let message = match days {
        0 => format!("{} is due today.", item.title),
        1 => format!("{} is due in 1 day.", item.title),
        n => format!("{} is due in {n} days.", item.title),
    };
    let mut notification = Notification::local(
        NotificationKind::DueSoon,
        format!("{} is due soon", item.title),
        message,
        now,
    );
    notification.external_id = Some(item.external_id.clone());
    notification.location = item.library_name.clone();
    notification.dedup_key = Some(due_key(&item.external_id, due_date_ms));
    notification
}

/// Periodic refresh plus due-date scan on the coarse notification timer.
pub struct NotificationPollJob {
    center: Arc<NotificationCenter>,
    lists: Arc<ListStore>,
}

impl NotificationPollJob {
    pub fn new(center: Arc<NotificationCenter>, lists: Arc<ListStore>) -> Self {
        Self { center, lists }
    }
}

#[async_trait]
impl Job for NotificationPollJob {
    fn name(&self) -> &'static str {
        "notification_poll"
    }

    async fn run(&self) {
        self.center
            .check_due_dates(&self.lists.items(ListType::Reading));
        if self.center.session.is_suspended() {
            debug!("event=notification_tick module={} status=skip reason=suspended", MODULE);
            return;
        }
        if let Err(err) = self.center.refresh().await {
            warn!(
                "event=notification_tick module={} status=error error={}",
                MODULE, err
            );
        }
    }
}
