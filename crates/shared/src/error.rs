use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::GrabHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeOperation {
    Grab,
    Move,
    Ungrab,
}

/// Failure of a request/response call across the host bridge.
///
/// Never retried by the core; surfaced to the immediate caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("host rejected {operation:?}: {message}")]
    Rejected {
        operation: BridgeOperation,
        message: String,
    },
    #[error("host has no record of {0}")]
    UnknownGrab(GrabHandle),
    #[error("host bridge is unavailable")]
    Unavailable,
}

impl BridgeError {
    pub fn rejected(operation: BridgeOperation, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }
}
