//! Personal book lists with optimistic mutation and remote reconciliation.
//!
//! # Responsibility
//! - Own the four in-memory lists and their persisted cache namespaces.
//! - Apply every user mutation locally first, then mirror it to the remote
//!   list store.
//! - Reconcile a list against the authoritative remote set on demand.
//!
//! # Invariants
//! - A local mutation is applied and published before its remote request
//!   starts.
//! - `external_id` is unique within one list.
//! - Transient remote failures never roll back a local mutation.
//! - A create acknowledgement only attaches to a record that still has no
//!   remote id.

use crate::error::CoreResult;
use crate::gateway::{GatewayError, GatewayErrorKind, RemoteListGateway};
use crate::logging::loggable;
use crate::model::book::{
    BookItem, BookPatch, BookValidationError, ListType, RemoteId, SyncState,
};
use crate::session::SessionGate;
use crate::storage::{
    list_key, load_or_default, lock, save_json, Storage, PENDING_DELETES_KEY,
};
use serde::{Deserialize, Serialize};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

const MODULE: &str = "list_store";

/// Snapshot of the four lists as observed by subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookLists {
    pub wishlist: Vec<BookItem>,
    pub reading: Vec<BookItem>,
    pub completed: Vec<BookItem>,
    pub reserved: Vec<BookItem>,
}

impl BookLists {
    pub fn get(&self, list: ListType) -> &[BookItem] {
        match list {
            ListType::Wishlist => &self.wishlist,
            ListType::Reading => &self.reading,
            ListType::Completed => &self.completed,
            ListType::Reserved => &self.reserved,
        }
    }

    fn get_mut(&mut self, list: ListType) -> &mut Vec<BookItem> {
        match list {
            ListType::Wishlist => &mut self.wishlist,
            ListType::Reading => &mut self.reading,
            ListType::Completed => &mut self.completed,
            ListType::Reserved => &mut self.reserved,
        }
    }

    pub fn find(&self, list: ListType, external_id: &str) -> Option<&BookItem> {
        self.get(list)
            .iter()
            .find(|item| item.external_id == external_id)
    }

    pub fn contains(&self, list: ListType, external_id: &str) -> bool {
        self.find(list, external_id).is_some()
    }

    pub fn total(&self) -> usize {
        ListType::ALL.iter().map(|list| self.get(*list).len()).sum()
    }

    fn find_mut(&mut self, list: ListType, external_id: &str) -> Option<&mut BookItem> {
        self.get_mut(list)
            .iter_mut()
            .find(|item| item.external_id == external_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Stored locally and acknowledged remotely.
    Synced(Option<RemoteId>),
    /// Stored locally; the remote create failed and will be retried by sync.
    LocalOnly,
    /// Same external id already present in the list; nothing changed.
    Duplicate,
    Invalid(BookValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
    Invalid(BookValidationError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Moved,
    NotFound,
    /// Target list already holds the same external id; nothing changed.
    DuplicateInTarget,
    SameList,
    Invalid(BookValidationError),
}

/// Result of one `sync_from_remote` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub remote_count: usize,
    pub uploaded: usize,
    pub failed_uploads: usize,
    /// `false` when the remote set could not be fetched.
    pub fetched: bool,
}

/// Use-case service over the four personal lists.
pub struct ListStore {
    gateway: Arc<dyn RemoteListGateway>,
    storage: Arc<dyn Storage>,
    session: Arc<SessionGate>,
    state: watch::Sender<BookLists>,
    revisions: AtomicU64,
    /// Local removals, so a reconciliation neither resurrects records
    /// deleted meanwhile nor records whose remote delete is still owed.
    tombstones: Mutex<HashMap<(ListType, String), Tombstone>>,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    revision: u64,
    /// Set until the remote store confirms the record is gone.
    delete_owed: bool,
}

/// Persisted form of a tombstone that still owes a remote delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingDelete {
    list: ListType,
    external_id: String,
    revision: u64,
}

/// Answer of a remote id lookup by external id.
enum RemoteLookup {
    Found(RemoteId),
    Missing,
    /// The remote set could not be fetched.
    Unknown,
}

impl RemoteLookup {
    fn found(self) -> Option<RemoteId> {
        match self {
            Self::Found(remote_id) => Some(remote_id),
            Self::Missing | Self::Unknown => None,
        }
    }
}

impl ListStore {
    pub fn new(
        gateway: Arc<dyn RemoteListGateway>,
        storage: Arc<dyn Storage>,
        session: Arc<SessionGate>,
    ) -> Self {
        let (state, _) = watch::channel(BookLists::default());
        Self {
            gateway,
            storage,
            session,
            state,
            revisions: AtomicU64::new(0),
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    /// Restores the four lists from the cache.
    ///
    /// Corrupt namespaces come back empty; duplicated external ids inside one
    /// list keep their first occurrence.
    pub fn load(&self) {
        let mut lists = BookLists::default();
        let mut max_revision = 0;
        for list in ListType::ALL {
            let cached: Vec<BookItem> = load_or_default(self.storage.as_ref(), &list_key(list));
            let mut seen = HashSet::new();
            let target = lists.get_mut(list);
            for mut item in cached {
                if !seen.insert(item.external_id.clone()) {
                    continue;
                }
                item.list = list;
                max_revision = max_revision.max(item.revision);
                target.push(item);
            }
        }
        let pending: Vec<PendingDelete> =
            load_or_default(self.storage.as_ref(), PENDING_DELETES_KEY);
        {
            let mut tombstones = lock(&self.tombstones);
            for entry in pending {
                max_revision = max_revision.max(entry.revision);
                tombstones.insert(
                    (entry.list, entry.external_id),
                    Tombstone {
                        revision: entry.revision,
                        delete_owed: true,
                    },
                );
            }
        }
        self.revisions.fetch_max(max_revision, Ordering::SeqCst);
        info!(
            "event=lists_load module={} status=ok items={}",
            MODULE,
            lists.total()
        );
        self.state.send_replace(lists);
    }

    pub fn subscribe(&self) -> watch::Receiver<BookLists> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> BookLists {
        self.state.borrow().clone()
    }

    pub fn items(&self, list: ListType) -> Vec<BookItem> {
        self.state.borrow().get(list).to_vec()
    }

    pub fn find(&self, list: ListType, external_id: &str) -> Option<BookItem> {
        self.state.borrow().find(list, external_id).cloned()
    }

    /// Wishlist items with at least one tracked location.
    pub fn tracked_wishlist_items(&self) -> Vec<BookItem> {
        self.state
            .borrow()
            .wishlist
            .iter()
            .filter(|item| item.is_tracked())
            .cloned()
            .collect()
    }

    pub fn has_tracked_items(&self) -> bool {
        self.state.borrow().wishlist.iter().any(BookItem::is_tracked)
    }

    /// Adds `item` to `list` optimistically, then creates it remotely.
    pub async fn add_item(&self, list: ListType, mut item: BookItem) -> CoreResult<AddOutcome> {
        item.list = list;
        if let Err(err) = item.validate() {
            return Ok(AddOutcome::Invalid(err));
        }
        item.remote_id = None;
        item.sync_state = SyncState::Pending;
        item.revision = self.next_revision();

        let inserted = self.state.send_if_modified(|lists| {
            if lists.contains(list, &item.external_id) {
                return false;
            }
            lists.get_mut(list).push(item.clone());
            true
        });
        if !inserted {
            info!(
                "event=list_add module={} status=skip reason=duplicate list={} external_id={}",
                MODULE, list, item.external_id
            );
            return Ok(AddOutcome::Duplicate);
        }
        if lock(&self.tombstones)
            .remove(&(list, item.external_id.clone()))
            .is_some_and(|tomb| tomb.delete_owed)
        {
            self.persist_pending_deletes();
        }
        self.persist(list);
        info!(
            "event=list_add module={} status=ok list={} external_id={} title={}",
            MODULE,
            list,
            item.external_id,
            loggable(&item.title)
        );

        self.session.ensure_active()?;
        match self.upload(list, &item).await? {
            Some(remote_id) => Ok(AddOutcome::Synced(Some(remote_id))),
            None if self.is_synced_locally(list, &item.external_id) => {
                Ok(AddOutcome::Synced(None))
            }
            None => Ok(AddOutcome::LocalOnly),
        }
    }

    /// Removes an item locally, then deletes it remotely. Never rolled back.
    pub async fn remove_item(&self, list: ListType, external_id: &str) -> CoreResult<RemoveOutcome> {
        let mut removed: Option<BookItem> = None;
        let revision = self.next_revision();
        self.state.send_if_modified(|lists| {
            let items = lists.get_mut(list);
            match items.iter().position(|item| item.external_id == external_id) {
                Some(index) => {
                    removed = Some(items.remove(index));
                    true
                }
                None => false,
            }
        });
        let Some(removed) = removed else {
            return Ok(RemoveOutcome::NotFound);
        };
        lock(&self.tombstones).insert(
            (list, external_id.to_string()),
            Tombstone {
                revision,
                delete_owed: true,
            },
        );
        self.persist_pending_deletes();
        self.persist(list);
        info!(
            "event=list_remove module={} status=ok list={} external_id={}",
            MODULE, list, external_id
        );

        self.session.ensure_active()?;
        let lookup = match removed.remote_id {
            Some(remote_id) => RemoteLookup::Found(remote_id),
            None => self.lookup_remote_id(list, external_id).await?,
        };
        match lookup {
            RemoteLookup::Found(remote_id) => {
                if self.delete_remote("delete", external_id, remote_id).await? {
                    self.settle_tombstone(list, external_id, revision);
                }
            }
            RemoteLookup::Missing => {
                debug!(
                    "event=list_remove_remote module={} status=skip reason=no_remote_record external_id={}",
                    MODULE, external_id
                );
                self.settle_tombstone(list, external_id, revision);
            }
            RemoteLookup::Unknown => {}
        }
        Ok(RemoveOutcome::Removed)
    }

    /// Patches an item locally, then remotely. Never rolled back.
    pub async fn update_field(
        &self,
        list: ListType,
        external_id: &str,
        patch: BookPatch,
    ) -> CoreResult<UpdateOutcome> {
        if let Err(err) = patch.validate() {
            return Ok(UpdateOutcome::Invalid(err));
        }
        if patch.is_empty() {
            return Ok(match self.find(list, external_id) {
                Some(_) => UpdateOutcome::Updated,
                None => UpdateOutcome::NotFound,
            });
        }
        let revision = self.next_revision();
        let mut known_remote_id: Option<Option<RemoteId>> = None;
        self.state.send_if_modified(|lists| match lists.find_mut(list, external_id) {
            Some(item) => {
                item.apply_patch(&patch);
                item.revision = revision;
                item.sync_state = SyncState::Pending;
                known_remote_id = Some(item.remote_id);
                true
            }
            None => false,
        });
        let Some(known_remote_id) = known_remote_id else {
            return Ok(UpdateOutcome::NotFound);
        };
        self.persist(list);
        debug!(
            "event=list_update module={} status=ok list={} external_id={}",
            MODULE, list, external_id
        );

        self.session.ensure_active()?;
        let remote_id = match known_remote_id {
            Some(remote_id) => Some(remote_id),
            None => self.lookup_remote_id(list, external_id).await?.found(),
        };
        let Some(remote_id) = remote_id else {
            debug!(
                "event=list_update_remote module={} status=skip reason=local_only external_id={}",
                MODULE, external_id
            );
            return Ok(UpdateOutcome::Updated);
        };
        match self.gateway.update(remote_id, &patch).await {
            Ok(()) => self.mark_synced(list, external_id, revision, remote_id),
            Err(err) => self.absorb("update", external_id, err)?,
        }
        Ok(UpdateOutcome::Updated)
    }

    /// Moves an item between lists, merging `extra` into it.
    ///
    /// Remotely a single move keeps the remote id and server history; only
    /// records without a known remote id fall back to delete + insert.
    pub async fn move_item(
        &self,
        external_id: &str,
        from: ListType,
        to: ListType,
        extra: BookPatch,
    ) -> CoreResult<MoveOutcome> {
        if from == to {
            return Ok(MoveOutcome::SameList);
        }
        if let Err(err) = extra.validate() {
            return Ok(MoveOutcome::Invalid(err));
        }

        let revision = self.next_revision();
        let mut outcome = MoveOutcome::NotFound;
        let mut moved: Option<BookItem> = None;
        self.state.send_if_modified(|lists| {
            if !lists.contains(from, external_id) {
                return false;
            }
            if lists.contains(to, external_id) {
                outcome = MoveOutcome::DuplicateInTarget;
                return false;
            }
            let source = lists.get_mut(from);
            let Some(index) = source.iter().position(|item| item.external_id == external_id)
            else {
                return false;
            };
            let mut item = source.remove(index);
            item.list = to;
            item.apply_patch(&extra);
            item.revision = revision;
            item.sync_state = SyncState::Pending;
            lists.get_mut(to).push(item.clone());
            moved = Some(item);
            outcome = MoveOutcome::Moved;
            true
        });
        let Some(item) = moved else {
            return Ok(outcome);
        };
        let cleared_owed = {
            let mut tombstones = lock(&self.tombstones);
            tombstones.insert(
                (from, external_id.to_string()),
                Tombstone {
                    revision,
                    delete_owed: false,
                },
            );
            tombstones
                .remove(&(to, external_id.to_string()))
                .is_some_and(|tomb| tomb.delete_owed)
        };
        if cleared_owed {
            self.persist_pending_deletes();
        }
        self.persist(from);
        self.persist(to);
        info!(
            "event=list_move module={} status=ok from={} to={} external_id={}",
            MODULE, from, to, external_id
        );

        self.session.ensure_active()?;
        match item.remote_id {
            Some(remote_id) => match self.gateway.move_item(remote_id, to, &extra).await {
                Ok(remote) => {
                    self.mark_synced(to, external_id, revision, remote.remote_id.unwrap_or(remote_id))
                }
                Err(err) => self.absorb("move", external_id, err)?,
            },
            None => {
                if let Some(stale_id) = self.lookup_remote_id(from, external_id).await?.found() {
                    if let Err(err) = self.gateway.delete(stale_id).await {
                        self.absorb("move_delete", external_id, err)?;
                    }
                }
                self.upload(to, &item).await?;
            }
        }
        Ok(MoveOutcome::Moved)
    }

    /// Reconciles `list` with the authoritative remote set.
    ///
    /// Local records unknown remotely and without a remote id are uploaded
    /// first; afterwards the local list becomes the remote set plus the fresh
    /// uploads. Remote wins on field conflicts. Records mutated locally while
    /// the fetch was in flight, and uploads that failed transiently, are kept.
    pub async fn sync_from_remote(&self, list: ListType) -> CoreResult<SyncReport> {
        self.session.ensure_active()?;
        let started_revision = self.revisions.load(Ordering::SeqCst);

        let remote = match self.gateway.list(list).await {
            Ok(remote) => remote,
            Err(err) => {
                self.absorb("list", list.as_str(), err)?;
                return Ok(SyncReport::default());
            }
        };
        let owed = self.retry_owed_deletes(list, &remote).await?;
        let remote_ids: HashSet<String> =
            remote.iter().map(|item| item.external_id.clone()).collect();
        let mut report = SyncReport {
            remote_count: remote.len(),
            fetched: true,
            ..SyncReport::default()
        };

        let mut created: Vec<(String, RemoteId)> = Vec::new();
        let mut next: Vec<BookItem> = remote
            .into_iter()
            .map(|mut item| {
                item.list = list;
                item.sync_state = SyncState::Synced;
                item.revision = 0;
                item
            })
            .collect();

        let candidates: Vec<BookItem> = self
            .items(list)
            .into_iter()
            .filter(|item| {
                item.remote_id.is_none()
                    && item.revision <= started_revision
                    && !remote_ids.contains(&item.external_id)
            })
            .collect();
        for mut item in candidates {
            match self.gateway.create(&item).await {
                Ok(remote_id) => {
                    item.remote_id = Some(remote_id);
                    item.sync_state = SyncState::Synced;
                    created.push((item.external_id.clone(), remote_id));
                    report.uploaded += 1;
                }
                Err(err) if err.is_conflict() => {
                    item.sync_state = SyncState::Synced;
                    report.uploaded += 1;
                }
                Err(err) => {
                    self.absorb("create", &item.external_id, err)?;
                    report.failed_uploads += 1;
                }
            }
            next.push(item);
        }

        let removed_meanwhile: HashSet<String> = {
            let mut tombstones = lock(&self.tombstones);
            let removed = tombstones
                .iter()
                .filter(|((tomb_list, _), tomb)| {
                    *tomb_list == list && (tomb.revision > started_revision || tomb.delete_owed)
                })
                .map(|((_, external_id), _)| external_id.clone())
                .collect();
            tombstones.retain(|(tomb_list, _), tomb| {
                *tomb_list != list || tomb.revision > started_revision || tomb.delete_owed
            });
            removed
        };

        for (external_id, remote_id) in created
            .iter()
            .filter(|(external_id, _)| removed_meanwhile.contains(external_id))
        {
            info!(
                "event=list_create_orphan module={} status=start external_id={} remote_id={}",
                MODULE, external_id, remote_id
            );
            if let Err(err) = self.gateway.delete(*remote_id).await {
                self.absorb("orphan_delete", external_id, err)?;
            }
        }

        self.state.send_modify(|lists| {
            let current = lists.get_mut(list);
            next.retain(|item| {
                !removed_meanwhile.contains(&item.external_id) && !owed.contains(&item.external_id)
            });
            for local in current.iter().filter(|item| item.revision > started_revision) {
                match next
                    .iter_mut()
                    .find(|candidate| candidate.external_id == local.external_id)
                {
                    Some(slot) => {
                        let remote_id = slot.remote_id.or(local.remote_id);
                        *slot = local.clone();
                        slot.remote_id = remote_id;
                    }
                    None => next.push(local.clone()),
                }
            }
            *current = next;
        });
        self.persist(list);
        info!(
            "event=list_sync module={} status=ok list={} remote_count={} uploaded={} failed_uploads={}",
            MODULE, list, report.remote_count, report.uploaded, report.failed_uploads
        );
        Ok(report)
    }

    /// Reconciles every list in order, stopping at the first auth failure.
    pub async fn sync_all(&self) -> CoreResult<Vec<(ListType, SyncReport)>> {
        let mut reports = Vec::with_capacity(ListType::ALL.len());
        for list in ListType::ALL {
            reports.push((list, self.sync_from_remote(list).await?));
        }
        Ok(reports)
    }

    /// Creates `item` remotely and attaches the acknowledged id.
    ///
    /// Returns the remote id when one is known afterwards.
    async fn upload(&self, list: ListType, item: &BookItem) -> CoreResult<Option<RemoteId>> {
        match self.gateway.create(item).await {
            Ok(remote_id) => {
                self.confirm_created(list, item, remote_id).await?;
                Ok(Some(remote_id))
            }
            Err(err) if err.is_conflict() => {
                debug!(
                    "event=list_create module={} status=ok reason=already_exists external_id={}",
                    MODULE, item.external_id
                );
                match self.lookup_remote_id(list, &item.external_id).await?.found() {
                    Some(remote_id) => {
                        self.confirm_created(list, item, remote_id).await?;
                        Ok(Some(remote_id))
                    }
                    None => {
                        self.mark_conflict_resolved(list, &item.external_id, item.revision);
                        Ok(None)
                    }
                }
            }
            Err(err) => {
                self.absorb("create", &item.external_id, err)?;
                Ok(None)
            }
        }
    }

    /// Attaches a create acknowledgement to the still-pending local record.
    ///
    /// When the record vanished meanwhile the orphaned remote copy is
    /// deleted; when it changed meanwhile the newer fields are pushed.
    async fn confirm_created(
        &self,
        list: ListType,
        sent: &BookItem,
        remote_id: RemoteId,
    ) -> CoreResult<()> {
        let mut changed_since_send: Option<BookItem> = None;
        let attached = self.state.send_if_modified(|lists| {
            let Some(record) = lists.find_mut(list, &sent.external_id) else {
                return false;
            };
            if record.remote_id.is_some() {
                return false;
            }
            record.remote_id = Some(remote_id);
            if record.revision == sent.revision {
                record.sync_state = SyncState::Synced;
            } else {
                changed_since_send = Some(record.clone());
            }
            true
        });

        if !attached {
            if self.find(list, &sent.external_id).is_some() {
                return Ok(());
            }
            info!(
                "event=list_create_orphan module={} status=start external_id={} remote_id={}",
                MODULE, sent.external_id, remote_id
            );
            if let Err(err) = self.gateway.delete(remote_id).await {
                self.absorb("orphan_delete", &sent.external_id, err)?;
            }
            return Ok(());
        }
        self.persist(list);

        if let Some(current) = changed_since_send {
            let patch = BookPatch::from(&current);
            match self.gateway.update(remote_id, &patch).await {
                Ok(()) => self.mark_synced(list, &current.external_id, current.revision, remote_id),
                Err(err) => self.absorb("update", &current.external_id, err)?,
            }
        }
        Ok(())
    }

    async fn lookup_remote_id(
        &self,
        list: ListType,
        external_id: &str,
    ) -> CoreResult<RemoteLookup> {
        match self.gateway.list(list).await {
            Ok(remote) => Ok(remote
                .into_iter()
                .find(|item| item.external_id == external_id)
                .and_then(|item| item.remote_id)
                .map_or(RemoteLookup::Missing, RemoteLookup::Found)),
            Err(err) => {
                self.absorb("lookup", external_id, err)?;
                Ok(RemoteLookup::Unknown)
            }
        }
    }

    /// Deletes a remote record. Returns `true` once the record is known gone.
    async fn delete_remote(
        &self,
        operation: &str,
        external_id: &str,
        remote_id: RemoteId,
    ) -> CoreResult<bool> {
        match self.gateway.delete(remote_id).await {
            Ok(()) => Ok(true),
            Err(err) => {
                let gone = err.kind == GatewayErrorKind::NotFound;
                self.absorb(operation, external_id, err)?;
                Ok(gone)
            }
        }
    }

    /// Re-issues remote deletes still owed for `list`.
    ///
    /// Returns every external id with an owed delete, acknowledged or not;
    /// none of them may come back from the fetched remote set.
    async fn retry_owed_deletes(
        &self,
        list: ListType,
        remote: &[BookItem],
    ) -> CoreResult<HashSet<String>> {
        let owed: Vec<(String, u64)> = lock(&self.tombstones)
            .iter()
            .filter(|((tomb_list, _), tomb)| *tomb_list == list && tomb.delete_owed)
            .map(|((_, external_id), tomb)| (external_id.clone(), tomb.revision))
            .collect();

        for (external_id, revision) in &owed {
            let remote_id = remote
                .iter()
                .find(|item| &item.external_id == external_id)
                .and_then(|item| item.remote_id);
            let gone = match remote_id {
                Some(remote_id) => {
                    info!(
                        "event=list_delete_retry module={} status=start external_id={} remote_id={}",
                        MODULE, external_id, remote_id
                    );
                    self.delete_remote("delete", external_id, remote_id).await?
                }
                None => true,
            };
            if gone {
                self.settle_tombstone(list, external_id, *revision);
            }
        }
        Ok(owed.into_iter().map(|(external_id, _)| external_id).collect())
    }

    /// Records that the remote delete for one removal is done.
    fn settle_tombstone(&self, list: ListType, external_id: &str, revision: u64) {
        let settled = match lock(&self.tombstones).get_mut(&(list, external_id.to_string())) {
            Some(tomb) if tomb.revision == revision && tomb.delete_owed => {
                tomb.delete_owed = false;
                true
            }
            _ => false,
        };
        if settled {
            self.persist_pending_deletes();
        }
    }

    fn persist_pending_deletes(&self) {
        let pending: Vec<PendingDelete> = lock(&self.tombstones)
            .iter()
            .filter(|(_, tomb)| tomb.delete_owed)
            .map(|((list, external_id), tomb)| PendingDelete {
                list: *list,
                external_id: external_id.clone(),
                revision: tomb.revision,
            })
            .collect();
        if let Err(err) = save_json(self.storage.as_ref(), PENDING_DELETES_KEY, &pending) {
            error!(
                "event=pending_deletes_persist module={} status=error error={}",
                MODULE, err
            );
        }
    }

    /// Marks a record synced if nothing changed it since `revision`.
    fn mark_synced(&self, list: ListType, external_id: &str, revision: u64, remote_id: RemoteId) {
        let changed = self.state.send_if_modified(|lists| {
            let Some(record) = lists.find_mut(list, external_id) else {
                return false;
            };
            if record.revision != revision {
                return false;
            }
            record.remote_id.get_or_insert(remote_id);
            record.sync_state = SyncState::Synced;
            true
        });
        if changed {
            self.persist(list);
        }
    }

    fn mark_conflict_resolved(&self, list: ListType, external_id: &str, revision: u64) {
        let changed = self.state.send_if_modified(|lists| {
            match lists.find_mut(list, external_id) {
                Some(record) if record.revision == revision => {
                    record.sync_state = SyncState::Synced;
                    true
                }
                _ => false,
            }
        });
        if changed {
            self.persist(list);
        }
    }

    fn is_synced_locally(&self, list: ListType, external_id: &str) -> bool {
        self.state
            .borrow()
            .find(list, external_id)
            .is_some_and(|item| item.sync_state == SyncState::Synced)
    }

    /// Applies the error taxonomy to a remote failure.
    ///
    /// Unauthorized suspends the session and propagates; everything else is
    /// logged and absorbed.
    fn absorb(&self, operation: &str, subject: &str, err: GatewayError) -> CoreResult<()> {
        match err.kind {
            GatewayErrorKind::Unauthorized => Err(self.session.suspend(MODULE, err)),
            GatewayErrorKind::NotFound if operation.ends_with("delete") => {
                debug!(
                    "event=list_{} module={} status=ok reason=already_gone subject={}",
                    operation, MODULE, subject
                );
                Ok(())
            }
            _ => {
                warn!(
                    "event=list_{} module={} status=error subject={} error_kind={} error={}",
                    operation,
                    MODULE,
                    subject,
                    err.kind.as_str(),
                    loggable(&err.message)
                );
                Ok(())
            }
        }
    }

    fn persist(&self, list: ListType) {
        let items = self.items(list);
        if let Err(err) = save_json(self.storage.as_ref(), &list_key(list), &items) {
            error!(
                "event=list_persist module={} status=error list={} error={}",
                MODULE, list, err
            );
        }
    }

    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::SeqCst) + 1
    }
}
