//! Injected platform capabilities.
//!
//! # Responsibility
//! - Abstract wall-clock time, device position and push delivery so the
//!   core runs without a real device environment.
//!
//! # See also
//! - `storage` for the persistence capability.

use crate::model::notification::Notification;
use crate::model::preferences::PermissionState;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock source in Unix epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// `Clock` backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Device position used to rank nearby locations.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Returns `None` when position is unavailable or not permitted.
    async fn current_position(&self) -> Option<Coordinates>;
}

/// Location provider that never knows the position.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_position(&self) -> Option<Coordinates> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    PermissionNotGranted,
    Delivery(String),
}

impl Display for PushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionNotGranted => write!(f, "push permission not granted"),
            Self::Delivery(message) => write!(f, "push delivery failed: {message}"),
        }
    }
}

impl Error for PushError {}

/// Device push notification surface.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    fn permission(&self) -> PermissionState;
    /// One-shot permission prompt.
    async fn request_permission(&self) -> PermissionState;
    fn deliver(&self, notification: &Notification) -> Result<(), PushError>;
}

/// Push notifier for environments without push support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPush;

#[async_trait]
impl PushNotifier for NoPush {
    fn permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    fn deliver(&self, _notification: &Notification) -> Result<(), PushError> {
        Err(PushError::PermissionNotGranted)
    }
}
