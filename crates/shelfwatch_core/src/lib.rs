//! Core domain logic for Shelfwatch.
//! Owns the personal book lists, availability monitoring and the
//! notification feed; hosts provide gateways and device capabilities.

pub mod app;
pub mod capability;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod schedule;
pub mod service;
pub mod session;
pub mod storage;

pub use app::{Capabilities, Gateways, ShelfCore};
pub use capability::{
    Clock, Coordinates, LocationProvider, NoLocation, NoPush, PushError, PushNotifier,
    SystemClock,
};
pub use config::{ConfigError, CoreConfig};
pub use error::{CoreError, CoreResult};
pub use gateway::{
    AvailabilitySource, GatewayError, GatewayErrorKind, GatewayResult, NotificationGateway,
    RemoteListGateway,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::availability::{
    should_notify, ChangeEvent, LocationAvailability, TrackingSnapshot, SIGNIFICANT_INCREASE,
};
pub use model::book::{
    BookItem, BookPatch, BookValidationError, ListType, RemoteId, ReservationStatus, SyncState,
};
pub use model::notification::{Notification, NotificationKind, RemoteNotification};
pub use model::preferences::{PermissionState, Preferences};
pub use service::availability_poller::{
    AvailabilityMonitor, AvailabilityPoller, ChangeListener, CheckOutcome, CycleResult,
    MonitorStatus,
};
pub use service::list_store::{
    AddOutcome, BookLists, ListStore, MoveOutcome, RemoveOutcome, SyncReport, UpdateOutcome,
};
pub use service::notification_center::{
    DeleteOutcome, NotificationCenter, ReadOutcome, RefreshOutcome,
};
pub use session::SessionGate;
pub use storage::{MemoryStorage, SqliteStorage, Storage, StorageError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
