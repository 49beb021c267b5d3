//! Book list record model.
//!
//! # Responsibility
//! - Define the record shared by wishlist/reading/completed/reserved lists.
//! - Provide patch helpers used by optimistic local mutation.
//!
//! # Invariants
//! - `external_id` is stable and unique within one list.
//! - `remote_id` is set only after the remote store acknowledged the record.
//! - `list` always matches the list the record is stored in.
//! - `progress` stays in `0..=100`, `rating` in `1..=5` when set.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Identifier assigned by the remote list store after first successful sync.
pub type RemoteId = i64;

/// The four personal lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    Wishlist,
    Reading,
    Completed,
    Reserved,
}

impl ListType {
    /// Every list in reconciliation order.
    pub const ALL: [ListType; 4] = [
        ListType::Wishlist,
        ListType::Reading,
        ListType::Completed,
        ListType::Reserved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wishlist => "wishlist",
            Self::Reading => "reading",
            Self::Completed => "completed",
            Self::Reserved => "reserved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "wishlist" => Some(Self::Wishlist),
            "reading" => Some(Self::Reading),
            "completed" => Some(Self::Completed),
            "reserved" => Some(Self::Reserved),
            _ => None,
        }
    }
}

impl Display for ListType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation lifecycle, meaningful for `ListType::Reserved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    ReadyForPickup,
    PickedUp,
    Cancelled,
    Returned,
}

/// Two-phase sync tag carried by every local record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Created or changed locally, not yet confirmed by the remote store.
    #[default]
    Pending,
    /// Matches a record the remote store acknowledged.
    Synced,
}

/// One book in one personal list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookItem {
    /// Catalogue identifier; stable across lists and syncs.
    pub external_id: String,
    /// Remote store id; `None` while the record is local-only.
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    pub list: ListType,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    /// Library holding the loan or reservation.
    #[serde(default)]
    pub library_name: Option<String>,
    /// Reading progress in percent.
    #[serde(default)]
    pub progress: u8,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub start_date: Option<i64>,
    /// Unix epoch milliseconds. Loan due date for reading items.
    #[serde(default)]
    pub due_date: Option<i64>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub completed_date: Option<i64>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub pickup_deadline: Option<i64>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub reservation_status: Option<ReservationStatus>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub notify_on_available: bool,
    /// Location names watched for stock changes (wishlist only).
    #[serde(default)]
    pub tracked_locations: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub sync_state: SyncState,
    /// Local mutation counter; never sent to the remote store.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub revision: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl BookItem {
    /// Creates a local-only record with empty list-specific fields.
    pub fn new(external_id: impl Into<String>, title: impl Into<String>, list: ListType) -> Self {
        Self {
            external_id: external_id.into(),
            remote_id: None,
            list,
            title: title.into(),
            author: None,
            cover_url: None,
            year: None,
            isbn: None,
            library_name: None,
            progress: 0,
            start_date: None,
            due_date: None,
            completed_date: None,
            pickup_deadline: None,
            rating: None,
            review: None,
            reservation_status: None,
            queue_position: None,
            notify_on_available: false,
            tracked_locations: Vec::new(),
            notes: None,
            sync_state: SyncState::Pending,
            revision: 0,
        }
    }

    /// Builder helper for wishlist items watched at the given locations.
    pub fn with_tracked_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_locations = normalize_locations(locations.into_iter().map(Into::into));
        self.notify_on_available = !self.tracked_locations.is_empty();
        self
    }

    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced && self.remote_id.is_some()
    }

    /// Returns whether the availability poller should look at this record.
    pub fn is_tracked(&self) -> bool {
        self.list == ListType::Wishlist && !self.tracked_locations.is_empty()
    }

    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        if self.external_id.trim().is_empty() {
            return Err(BookValidationError::EmptyExternalId);
        }
        if self.title.trim().is_empty() {
            return Err(BookValidationError::EmptyTitle);
        }
        validate_progress(self.progress)?;
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }
        Ok(())
    }

    /// Applies every set field of `patch`.
    ///
    /// Does not touch identity, list membership or sync bookkeeping.
    pub fn apply_patch(&mut self, patch: &BookPatch) {
        if let Some(value) = &patch.title {
            self.title = value.clone();
        }
        if let Some(value) = &patch.author {
            self.author = Some(value.clone());
        }
        if let Some(value) = &patch.cover_url {
            self.cover_url = Some(value.clone());
        }
        if let Some(value) = &patch.library_name {
            self.library_name = Some(value.clone());
        }
        if let Some(value) = patch.progress {
            self.progress = value;
        }
        if let Some(value) = patch.start_date {
            self.start_date = Some(value);
        }
        if let Some(value) = patch.due_date {
            self.due_date = Some(value);
        }
        if let Some(value) = patch.completed_date {
            self.completed_date = Some(value);
        }
        if let Some(value) = patch.pickup_deadline {
            self.pickup_deadline = Some(value);
        }
        if let Some(value) = patch.rating {
            self.rating = Some(value);
        }
        if let Some(value) = &patch.review {
            self.review = Some(value.clone());
        }
        if let Some(value) = patch.reservation_status {
            self.reservation_status = Some(value);
        }
        if let Some(value) = patch.queue_position {
            self.queue_position = Some(value);
        }
        if let Some(value) = patch.notify_on_available {
            self.notify_on_available = value;
        }
        if let Some(value) = &patch.tracked_locations {
            self.tracked_locations = normalize_locations(value.iter().cloned());
        }
        if let Some(value) = &patch.notes {
            self.notes = Some(value.clone());
        }
    }
}

/// Partial update for list-specific and metadata fields.
///
/// `None` means "leave unchanged". Serialized without unset fields so it can
/// be sent verbatim as a remote PATCH body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_deadline: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_status: Option<ReservationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_on_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Validates value ranges of the set fields.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(BookValidationError::EmptyTitle);
            }
        }
        if let Some(progress) = self.progress {
            validate_progress(progress)?;
        }
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }
        Ok(())
    }
}

impl From<&BookItem> for BookPatch {
    /// Full patch carrying every mutable field of `item`.
    fn from(item: &BookItem) -> Self {
        Self {
            title: Some(item.title.clone()),
            author: item.author.clone(),
            cover_url: item.cover_url.clone(),
            library_name: item.library_name.clone(),
            progress: Some(item.progress),
            start_date: item.start_date,
            due_date: item.due_date,
            completed_date: item.completed_date,
            pickup_deadline: item.pickup_deadline,
            rating: item.rating,
            review: item.review.clone(),
            reservation_status: item.reservation_status,
            queue_position: item.queue_position,
            notify_on_available: Some(item.notify_on_available),
            tracked_locations: Some(item.tracked_locations.clone()),
            notes: item.notes.clone(),
        }
    }
}

/// Record validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookValidationError {
    EmptyExternalId,
    EmptyTitle,
    ProgressOutOfRange(u8),
    RatingOutOfRange(u8),
}

impl Display for BookValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyExternalId => write!(f, "external id cannot be empty"),
            Self::EmptyTitle => write!(f, "title cannot be empty"),
            Self::ProgressOutOfRange(value) => {
                write!(f, "progress must be within 0..=100, got {value}")
            }
            Self::RatingOutOfRange(value) => write!(f, "rating must be within 1..=5, got {value}"),
        }
    }
}

impl Error for BookValidationError {}

fn validate_progress(progress: u8) -> Result<(), BookValidationError> {
    if progress > 100 {
        return Err(BookValidationError::ProgressOutOfRange(progress));
    }
    Ok(())
}

fn validate_rating(rating: u8) -> Result<(), BookValidationError> {
    if !(1..=5).contains(&rating) {
        return Err(BookValidationError::RatingOutOfRange(rating));
    }
    Ok(())
}

/// Trims names, drops blanks and keeps the first occurrence of duplicates.
fn normalize_locations(locations: impl Iterator<Item = String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for location in locations {
        let trimmed = location.trim();
        if trimmed.is_empty() || normalized.iter().any(|existing| existing == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}
