//! Composition root wiring components, schedules and the session gate.
//!
//! # Responsibility
//! - Build the three components over one storage and one session gate.
//! - Own the availability and notification schedules.
//! - Re-evaluate the availability schedule whenever the lists change.

use crate::capability::{Clock, LocationProvider, NoLocation, NoPush, PushNotifier, SystemClock};
use crate::config::{ConfigError, CoreConfig};
use crate::error::CoreResult;
use crate::gateway::{AvailabilitySource, NotificationGateway, RemoteListGateway};
use crate::schedule::ScheduledTask;
use crate::service::availability_poller::{AvailabilityMonitor, AvailabilityPoller};
use crate::service::list_store::ListStore;
use crate::service::notification_center::{NotificationCenter, NotificationPollJob};
use crate::session::SessionGate;
use crate::storage::{lock, Storage};
use log::{info, warn};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Remote collaborators.
pub struct Gateways {
    pub lists: Arc<dyn RemoteListGateway>,
    pub availability: Arc<dyn AvailabilitySource>,
    pub notifications: Arc<dyn NotificationGateway>,
}

/// Device collaborators.
pub struct Capabilities {
    pub clock: Arc<dyn Clock>,
    pub location: Arc<dyn LocationProvider>,
    pub push: Arc<dyn PushNotifier>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            location: Arc::new(NoLocation),
            push: Arc::new(NoPush),
        }
    }
}

pub struct ShelfCore {
    config: CoreConfig,
    session: Arc<SessionGate>,
    lists: Arc<ListStore>,
    monitor: Arc<AvailabilityMonitor>,
    notifications: Arc<NotificationCenter>,
    notification_task: ScheduledTask,
    list_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ShelfCore {
    pub fn new(
        config: CoreConfig,
        storage: Arc<dyn Storage>,
        gateways: Gateways,
        capabilities: Capabilities,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let session = Arc::new(SessionGate::new());
        let lists = Arc::new(ListStore::new(
            gateways.lists,
            Arc::clone(&storage),
            Arc::clone(&session),
        ));
        let notifications = Arc::new(NotificationCenter::new(
            gateways.notifications,
            Arc::clone(&storage),
            Arc::clone(&capabilities.clock),
            capabilities.push,
            Arc::clone(&session),
            &config,
        ));
        let poller = Arc::new(AvailabilityPoller::new(
            Arc::clone(&lists),
            gateways.availability,
            capabilities.location,
            storage,
            capabilities.clock,
            Arc::clone(&session),
            &config,
        ));
        poller.set_listener(&notifications);
        let monitor = Arc::new(AvailabilityMonitor::new(poller, &config));
        let notification_task = ScheduledTask::new(
            Arc::new(NotificationPollJob::new(
                Arc::clone(&notifications),
                Arc::clone(&lists),
            )),
            config.notification_poll_interval(),
            config.notification_poll_interval(),
        );

        Ok(Self {
            config,
            session,
            lists,
            monitor,
            notifications,
            notification_task,
            list_watcher: Mutex::new(None),
        })
    }

    /// Loads caches, reconciles the lists and starts both schedules.
    ///
    /// Must be called from within a tokio runtime. Remote failures leave the
    /// cached state in place; only an authorization failure is returned.
    pub async fn start(&self) -> CoreResult<()> {
        self.lists.load();
        self.notifications.load();
        info!(
            "event=core_start module=app status=start availability_interval_secs={} notification_poll_interval_secs={}",
            self.config.availability_interval_secs, self.config.notification_poll_interval_secs
        );

        let synced = self.lists.sync_all().await;
        self.spawn_list_watcher();
        self.monitor.reconcile_schedule();
        self.notification_task.start();
        if let Err(err) = &synced {
            warn!("event=core_start module=app status=error error={}", err);
        }
        synced.map(|_| ())
    }

    /// Re-enables remote activity after re-authentication.
    pub fn resume_session(&self) {
        self.session.resume();
        self.monitor.reconcile_schedule();
        self.notification_task.start();
    }

    /// Stops both schedules. Work in flight completes but its results are
    /// discarded.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.list_watcher).take() {
            handle.abort();
        }
        self.monitor.stop();
        self.notification_task.stop();
        self.notifications.invalidate_in_flight();
        info!("event=core_shutdown module=app status=ok");
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionGate> {
        &self.session
    }

    pub fn lists(&self) -> &Arc<ListStore> {
        &self.lists
    }

    pub fn monitor(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub fn is_notification_poll_running(&self) -> bool {
        self.notification_task.is_running()
    }

    fn spawn_list_watcher(&self) {
        let mut slot = lock(&self.list_watcher);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let mut changes = self.lists.subscribe();
        let monitor = Arc::clone(&self.monitor);
        *slot = Some(tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                monitor.reconcile_schedule();
            }
        }));
    }
}

impl Drop for ShelfCore {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.list_watcher).take() {
            handle.abort();
        }
        self.monitor.stop();
    }
}
