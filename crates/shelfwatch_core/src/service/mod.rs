//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate gateway, storage and capability calls into the list,
//!   availability and notification use cases.
//! - Keep host and UI layers decoupled from storage and transport details.

pub mod availability_poller;
pub mod list_store;
pub mod notification_center;
