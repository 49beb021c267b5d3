//! Shared authorization gate.
//!
//! # Invariants
//! - The first `Unauthorized` remote answer suspends every component.
//! - Only an explicit `resume()` (after re-authentication) re-enables
//!   remote calls.

use crate::error::{CoreError, CoreResult};
use crate::gateway::GatewayError;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SessionGate {
    suspended: AtomicBool,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Returns `SessionSuspended` while remote activity is blocked.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.is_suspended() {
            return Err(CoreError::SessionSuspended);
        }
        Ok(())
    }

    /// Suspends remote activity and converts the gateway error for callers.
    pub fn suspend(&self, module: &str, err: GatewayError) -> CoreError {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            warn!(
                "event=session_suspended module={} status=error error={}",
                module, err
            );
        }
        CoreError::Unauthorized(err)
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            info!("event=session_resumed module=session status=ok");
        }
    }
}
