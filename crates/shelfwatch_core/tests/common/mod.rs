#![allow(dead_code)]

use async_trait::async_trait;
use shelfwatch_core::{
    AvailabilityPoller, AvailabilitySource, BookItem, BookPatch, Clock, CoreConfig, GatewayError,
    GatewayResult, ListStore, ListType, LocationAvailability, MemoryStorage, NoLocation,
    Notification, NotificationCenter, NotificationGateway, PermissionState, PushError,
    PushNotifier, RemoteId, RemoteListGateway, RemoteNotification, SessionGate, Storage, SyncState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const T0: i64 = 1_700_000_000_000;

#[derive(Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct CallCounts {
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
    pub list: AtomicUsize,
    pub moves: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// In-memory remote list store.
#[derive(Default)]
pub struct FakeListGateway {
    records: Mutex<HashMap<ListType, Vec<BookItem>>>,
    next_id: AtomicI64,
    failure: Mutex<Option<GatewayError>>,
    create_gate: Mutex<Option<Arc<Notify>>>,
    pub calls: CallCounts,
}

impl FakeListGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        })
    }

    /// Every call fails with `err` until cleared.
    pub fn fail_with(&self, err: Option<GatewayError>) {
        *self.failure.lock().unwrap() = err;
    }

    /// Holds every create until the returned gate is notified.
    pub fn hold_creates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn release_creates(&self) {
        if let Some(gate) = self.create_gate.lock().unwrap().take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    /// Seeds a remote record and returns its id.
    pub fn seed(&self, list: ListType, mut item: BookItem) -> RemoteId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        item.list = list;
        item.remote_id = Some(id);
        item.sync_state = SyncState::Synced;
        item.revision = 0;
        self.records
            .lock()
            .unwrap()
            .entry(list)
            .or_default()
            .push(item);
        id
    }

    pub fn remote(&self, list: ListType) -> Vec<BookItem> {
        self.records
            .lock()
            .unwrap()
            .get(&list)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.records.lock().unwrap().values().map(Vec::len).sum()
    }

    fn check_failure(&self) -> GatewayResult<()> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteListGateway for FakeListGateway {
    async fn create(&self, item: &BookItem) -> GatewayResult<RemoteId> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let gate = self.create_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        let entries = records.entry(item.list).or_default();
        if entries.iter().any(|r| r.external_id == item.external_id) {
            return Err(GatewayError::conflict("already in list"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = item.clone();
        stored.remote_id = Some(id);
        stored.sync_state = SyncState::Synced;
        stored.revision = 0;
        entries.push(stored);
        Ok(id)
    }

    async fn update(&self, remote_id: RemoteId, patch: &BookPatch) -> GatewayResult<()> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|r| r.remote_id == Some(remote_id))
            .ok_or_else(|| GatewayError::not_found("no such record"))?;
        record.apply_patch(patch);
        Ok(())
    }

    async fn delete(&self, remote_id: RemoteId) -> GatewayResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        for items in records.values_mut() {
            if let Some(index) = items.iter().position(|r| r.remote_id == Some(remote_id)) {
                items.remove(index);
                return Ok(());
            }
        }
        Err(GatewayError::not_found("no such record"))
    }

    async fn list(&self, list: ListType) -> GatewayResult<Vec<BookItem>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.remote(list))
    }

    async fn move_item(
        &self,
        remote_id: RemoteId,
        to: ListType,
        patch: &BookPatch,
    ) -> GatewayResult<BookItem> {
        self.calls.moves.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        let mut found = None;
        for items in records.values_mut() {
            if let Some(index) = items.iter().position(|r| r.remote_id == Some(remote_id)) {
                found = Some(items.remove(index));
                break;
            }
        }
        let mut record = found.ok_or_else(|| GatewayError::not_found("no such record"))?;
        record.list = to;
        record.apply_patch(patch);
        records.entry(to).or_default().push(record.clone());
        Ok(record)
    }
}

/// Scripted per-item availability.
#[derive(Default)]
pub struct FakeAvailability {
    reports: Mutex<HashMap<String, Vec<LocationAvailability>>>,
    failing: Mutex<HashMap<String, GatewayError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub calls: AtomicUsize,
}

impl FakeAvailability {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, external_id: &str, location: &str, available: u32) {
        let mut reports = self.reports.lock().unwrap();
        let entries = reports.entry(external_id.to_string()).or_default();
        match entries.iter_mut().find(|entry| entry.location == location) {
            Some(entry) => entry.available_count = available,
            None => entries.push(LocationAvailability {
                location: location.to_string(),
                available_count: available,
                total_count: available.max(3),
                distance_km: None,
            }),
        }
    }

    pub fn fail(&self, external_id: &str, err: GatewayError) {
        self.failing
            .lock()
            .unwrap()
            .insert(external_id.to_string(), err);
    }

    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilitySource for FakeAvailability {
    async fn get_availability(
        &self,
        external_id: &str,
        _lat: Option<f64>,
        _lon: Option<f64>,
    ) -> GatewayResult<Vec<LocationAvailability>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.failing.lock().unwrap().get(external_id).cloned() {
            return Err(err);
        }
        Ok(self
            .reports
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory notification store.
#[derive(Default)]
pub struct FakeNotificationGateway {
    records: Mutex<Vec<RemoteNotification>>,
    failure: Mutex<Option<GatewayError>>,
    mutation_failure: Mutex<Option<GatewayError>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    mutation_gate: Mutex<Option<Arc<Notify>>>,
    pub mark_read_calls: AtomicUsize,
    pub mark_all_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeNotificationGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, err: Option<GatewayError>) {
        *self.failure.lock().unwrap() = err;
    }

    /// Fails read/delete calls only; listing keeps working.
    pub fn fail_mutations_with(&self, err: Option<GatewayError>) {
        *self.mutation_failure.lock().unwrap() = err;
    }

    /// Holds every list call until released.
    pub fn hold_lists(&self) {
        *self.list_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    /// Holds every read/delete call until released.
    pub fn hold_mutations(&self) {
        *self.mutation_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release_all(&self) {
        for slot in [&self.list_gate, &self.mutation_gate] {
            if let Some(gate) = slot.lock().unwrap().take() {
                gate.notify_waiters();
                gate.notify_one();
            }
        }
    }

    async fn wait_at(slot: &Mutex<Option<Arc<Notify>>>) {
        let gate = slot.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    pub fn push(&self, id: u64, notification_type: &str, read: bool, created_at_ms: i64) {
        self.records.lock().unwrap().push(RemoteNotification {
            id,
            notification_type: notification_type.to_string(),
            title: format!("remote {id}"),
            message: format!("message {id}"),
            external_id: None,
            library_name: None,
            read,
            created_at_ms,
        });
    }

    pub fn is_read(&self, id: u64) -> Option<bool> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.read)
    }

    fn check_failure(&self) -> GatewayResult<()> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_mutation_failure(&self) -> GatewayResult<()> {
        self.check_failure()?;
        match self.mutation_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationGateway for FakeNotificationGateway {
    async fn list(&self, unread_only: bool) -> GatewayResult<Vec<RemoteNotification>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Self::wait_at(&self.list_gate).await;
        self.check_failure()?;
        let mut records: Vec<RemoteNotification> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !unread_only || !r.read)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(records)
    }

    async fn mark_read(&self, id: u64) -> GatewayResult<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        Self::wait_at(&self.mutation_gate).await;
        self.check_mutation_failure()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| GatewayError::not_found("no such notification"))?;
        record.read = true;
        Ok(())
    }

    async fn mark_all_read(&self) -> GatewayResult<()> {
        self.mark_all_calls.fetch_add(1, Ordering::SeqCst);
        Self::wait_at(&self.mutation_gate).await;
        self.check_mutation_failure()?;
        for record in self.records.lock().unwrap().iter_mut() {
            record.read = true;
        }
        Ok(())
    }

    async fn delete(&self, id: u64) -> GatewayResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Self::wait_at(&self.mutation_gate).await;
        self.check_mutation_failure()?;
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(GatewayError::not_found("no such notification"));
        }
        Ok(())
    }
}

/// Push notifier recording every delivery.
pub struct RecordingPush {
    permission: Mutex<PermissionState>,
    prompt_answer: PermissionState,
    pub prompts: AtomicUsize,
    pub delivered: Mutex<Vec<Notification>>,
}

impl RecordingPush {
    pub fn granted() -> Arc<Self> {
        Self::with(PermissionState::Granted, PermissionState::Granted)
    }

    pub fn with(initial: PermissionState, prompt_answer: PermissionState) -> Arc<Self> {
        Arc::new(Self {
            permission: Mutex::new(initial),
            prompt_answer,
            prompts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.id.clone())
            .collect()
    }
}

#[async_trait]
impl PushNotifier for RecordingPush {
    fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionState {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        *self.permission.lock().unwrap() = self.prompt_answer;
        self.prompt_answer
    }

    fn deliver(&self, notification: &Notification) -> Result<(), PushError> {
        if *self.permission.lock().unwrap() != PermissionState::Granted {
            return Err(PushError::PermissionNotGranted);
        }
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Test configuration without inter-item pauses.
pub fn fast_config() -> CoreConfig {
    CoreConfig {
        inter_item_delay_ms: 0,
        ..CoreConfig::default()
    }
}

/// Fully wired components over fakes.
pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub session: Arc<SessionGate>,
    pub clock: Arc<ManualClock>,
    pub list_gateway: Arc<FakeListGateway>,
    pub availability: Arc<FakeAvailability>,
    pub notification_gateway: Arc<FakeNotificationGateway>,
    pub push: Arc<RecordingPush>,
    pub lists: Arc<ListStore>,
    pub poller: Arc<AvailabilityPoller>,
    pub center: Arc<NotificationCenter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<MemoryStorage>) -> Self {
        let config = fast_config();
        let session = Arc::new(SessionGate::new());
        let clock = ManualClock::at(T0);
        let list_gateway = FakeListGateway::new();
        let availability = FakeAvailability::new();
        let notification_gateway = FakeNotificationGateway::new();
        let push = RecordingPush::granted();
        let shared: Arc<dyn Storage> = storage.clone();

        let lists = Arc::new(ListStore::new(
            list_gateway.clone(),
            Arc::clone(&shared),
            Arc::clone(&session),
        ));
        let center = Arc::new(NotificationCenter::new(
            notification_gateway.clone(),
            Arc::clone(&shared),
            clock.clone(),
            push.clone(),
            Arc::clone(&session),
            &config,
        ));
        let poller = Arc::new(AvailabilityPoller::new(
            Arc::clone(&lists),
            availability.clone(),
            Arc::new(NoLocation),
            shared,
            clock.clone(),
            Arc::clone(&session),
            &config,
        ));
        poller.set_listener(&center);
        lists.load();
        center.load();

        Self {
            storage,
            session,
            clock,
            list_gateway,
            availability,
            notification_gateway,
            push,
            lists,
            poller,
            center,
        }
    }
}

pub fn wishlist_item(external_id: &str, title: &str, locations: &[&str]) -> BookItem {
    BookItem::new(external_id, title, ListType::Wishlist)
        .with_tracked_locations(locations.iter().copied())
}

/// Yields until `condition` holds, bounded so a broken test fails instead
/// of hanging.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
