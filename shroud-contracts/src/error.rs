// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by the OS-facing device seam.
///
/// `NotFound` carries "this device does not exist yet / no longer exists"
/// semantics; callers at reconciliation and attach boundaries convert it
/// to control flow instead of propagating it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device is busy: {0}")]
    Busy(String),

    #[error("not mounted: {0}")]
    NotMounted(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device operation failed: {0}")]
    Failure(String),
}

impl DeviceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Transport-level failures talking to the privileged mapping helper.
///
/// An operation the helper refused is not an error at this layer: the
/// helper reports refusal as a `false` return, which the lifecycle
/// surfaces as an operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum HelperError {
    #[error("helper connection failed: {0}")]
    Connection(String),

    #[error("helper call failed: {0}")]
    Rpc(String),
}

impl From<zbus::Error> for HelperError {
    fn from(err: zbus::Error) -> Self {
        Self::Rpc(err.to_string())
    }
}
