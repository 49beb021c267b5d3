//! Availability tracking records.
//!
//! # Invariants
//! - A `TrackingSnapshot` is keyed by (external id, location name).
//! - `ChangeEvent`s are ephemeral and only exist for counts that differ from
//!   the stored snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum increase that is worth an alert when stock was already non-zero.
pub const SIGNIFICANT_INCREASE: u32 = 3;

/// Current stock at one location as reported by the availability source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationAvailability {
    pub location: String,
    pub available_count: u32,
    pub total_count: u32,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

/// Last observed stock for one tracked location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub available_count: u32,
    /// Unix epoch milliseconds of the observation.
    pub observed_at_ms: i64,
}

/// Persisted snapshot set of one item, keyed by location name.
pub type ItemSnapshots = BTreeMap<String, TrackingSnapshot>;

/// Stock transition detected by one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub external_id: String,
    pub title: String,
    pub location: String,
    pub previous_available: u32,
    pub current_available: u32,
    pub timestamp_ms: i64,
}

impl ChangeEvent {
    pub fn is_significant(&self) -> bool {
        should_notify(self.previous_available, self.current_available)
    }
}

/// Significance rule for availability transitions.
///
/// True when stock appears from zero, or grows by at least
/// [`SIGNIFICANT_INCREASE`]. Decreases never notify.
pub fn should_notify(previous_available: u32, current_available: u32) -> bool {
    if previous_available == 0 && current_available > 0 {
        return true;
    }
    current_available > previous_available
        && current_available - previous_available >= SIGNIFICANT_INCREASE
}
