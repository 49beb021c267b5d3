//! Runtime configuration for polling and alerting.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a valid configuration.
//! - The notification poll is never finer than the availability poll.

use crate::logging::{default_log_level, normalize_level};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const MIN_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Availability poll interval.
    pub availability_interval_secs: u64,
    /// Delay before the first availability cycle after start.
    pub availability_initial_delay_secs: u64,
    /// Pause between two item lookups inside one cycle.
    pub inter_item_delay_ms: u64,
    /// Upper bound of items polled per cycle.
    pub max_items_per_cycle: usize,
    /// Notification gateway poll interval.
    pub notification_poll_interval_secs: u64,
    /// Due dates closer than this produce a due-soon alert.
    pub due_soon_window_days: u32,
    /// Level handed to `init_logging` by the host entry point.
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            availability_interval_secs: 300,
            availability_initial_delay_secs: 0,
            inter_item_delay_ms: 500,
            max_items_per_cycle: 50,
            notification_poll_interval_secs: 900,
            due_soon_window_days: 3,
            log_level: default_log_level().to_string(),
        }
    }
}

impl CoreConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.availability_interval_secs < MIN_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooShort("availability_interval_secs"));
        }
        if self.notification_poll_interval_secs < MIN_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooShort(
                "notification_poll_interval_secs",
            ));
        }
        if self.notification_poll_interval_secs < self.availability_interval_secs {
            return Err(ConfigError::NotificationPollTooFrequent {
                notification_secs: self.notification_poll_interval_secs,
                availability_secs: self.availability_interval_secs,
            });
        }
        if self.max_items_per_cycle == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        normalize_level(&self.log_level).map_err(ConfigError::LogLevel)?;
        Ok(())
    }

    pub fn availability_interval(&self) -> Duration {
        Duration::from_secs(self.availability_interval_secs)
    }

    pub fn availability_initial_delay(&self) -> Duration {
        Duration::from_secs(self.availability_initial_delay_secs)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_secs(self.notification_poll_interval_secs)
    }

    pub fn due_soon_window_ms(&self) -> i64 {
        i64::from(self.due_soon_window_days) * 24 * 60 * 60 * 1000
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    IntervalTooShort(&'static str),
    NotificationPollTooFrequent {
        notification_secs: u64,
        availability_secs: u64,
    },
    EmptyBatch,
    LogLevel(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid configuration document: {message}"),
            Self::IntervalTooShort(field) => {
                write!(f, "`{field}` must be at least {MIN_INTERVAL_SECS} second")
            }
            Self::NotificationPollTooFrequent {
                notification_secs,
                availability_secs,
            } => write!(
                f,
                "notification poll ({notification_secs}s) must not be finer than availability poll ({availability_secs}s)"
            ),
            Self::EmptyBatch => write!(f, "`max_items_per_cycle` must be at least 1"),
            Self::LogLevel(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {}
