//! Domain model for personal book lists, availability tracking and alerts.
//!
//! # Responsibility
//! - Define the records exchanged between list, availability and
//!   notification components.
//! - Keep pure rules (validation, significance, id classification) next to
//!   the data they describe.
//!
//! # Invariants
//! - A `BookItem` belongs to exactly one list at any instant.
//! - Notification origin is derived from the id format, never from content.

pub mod availability;
pub mod book;
pub mod notification;
pub mod preferences;
