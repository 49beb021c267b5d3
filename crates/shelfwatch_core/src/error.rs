//! Error surfaced by public component operations.
//!
//! Remote failures are absorbed inside components (logged, retried on the
//! next cycle) and local cache write failures are logged; only
//! authorization problems reach callers.

use crate::gateway::GatewayError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug)]
pub enum CoreError {
    /// Remote rejected the credentials. Sync and polling stay suspended
    /// until the session gate is resumed.
    Unauthorized(GatewayError),
    /// A remote step was skipped because the session is suspended.
    SessionSuspended,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized(err) => write!(f, "re-authentication required: {err}"),
            Self::SessionSuspended => write!(f, "session suspended until re-authentication"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unauthorized(err) => Some(err),
            Self::SessionSuspended => None,
        }
    }
}
