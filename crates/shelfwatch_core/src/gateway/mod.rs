//! Remote collaborator contracts.
//!
//! # Responsibility
//! - Describe the remote list store, the availability source and the
//!   notification store as injected async interfaces.
//! - Classify remote failures so callers can apply the error taxonomy
//!   (transient, conflict, unauthorized) without inspecting transports.
//!
//! # Invariants
//! - `create` on a duplicate external id reports `GatewayErrorKind::Conflict`,
//!   never a generic failure.
//! - Implementations must not retry internally; retry happens on the next
//!   scheduled cycle or user action.

use crate::model::availability::LocationAvailability;
use crate::model::book::{BookItem, BookPatch, ListType, RemoteId};
use crate::model::notification::RemoteNotification;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure category of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Network or server hiccup; retried naturally later.
    Transient,
    /// Record already exists (409-equivalent).
    Conflict,
    NotFound,
    /// Credentials rejected; requires re-authentication.
    Unauthorized,
    /// Request refused for any other non-retryable reason.
    Rejected,
}

impl GatewayErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Rejected => "rejected",
        }
    }
}

/// Error envelope returned by every gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Transient, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Unauthorized, message)
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == GatewayErrorKind::Conflict
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == GatewayErrorKind::Unauthorized
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} gateway error: {}", self.kind.as_str(), self.message)
    }
}

impl Error for GatewayError {}

/// Authoritative remote store for the four book lists.
#[async_trait]
pub trait RemoteListGateway: Send + Sync {
    /// Creates a record and returns its remote id.
    async fn create(&self, item: &BookItem) -> GatewayResult<RemoteId>;
    async fn update(&self, remote_id: RemoteId, patch: &BookPatch) -> GatewayResult<()>;
    async fn delete(&self, remote_id: RemoteId) -> GatewayResult<()>;
    /// Returns every remote record of `list`, each with `remote_id` set.
    async fn list(&self, list: ListType) -> GatewayResult<Vec<BookItem>>;
    /// Changes the list of an existing record, keeping its remote id.
    async fn move_item(
        &self,
        remote_id: RemoteId,
        to: ListType,
        extra: &BookPatch,
    ) -> GatewayResult<BookItem>;
}

/// Catalogue stock lookup.
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    async fn get_availability(
        &self,
        external_id: &str,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> GatewayResult<Vec<LocationAvailability>>;
}

/// Server-side notification records.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn list(&self, unread_only: bool) -> GatewayResult<Vec<RemoteNotification>>;
    async fn mark_read(&self, id: u64) -> GatewayResult<()>;
    async fn mark_all_read(&self) -> GatewayResult<()>;
    async fn delete(&self, id: u64) -> GatewayResult<()>;
}
