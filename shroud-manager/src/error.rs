// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

use shroud_contracts::{DeviceError, HelperError};

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("volume {0} is already unlocked")]
    AlreadyUnlocked(String),

    #[error("volume {0} is not unlocked")]
    NotUnlocked(String),

    #[error("timeout while waiting for loop setup of {0}")]
    LoopSetupTimeout(String),

    #[error("privileged {operation} operation failed for {name}")]
    OperationFailed {
        operation: &'static str,
        name: String,
    },

    #[error("{0} is busy: one or more applications are keeping the volume busy")]
    DeviceBusy(String),

    #[error("another operation is in progress for {0}")]
    TransitionInProgress(String),

    #[error("{0} is not backed by a loop device and cannot be detached")]
    NotDetachable(String),

    #[error(transparent)]
    Device(DeviceError),

    #[error(transparent)]
    Helper(#[from] HelperError),
}

impl From<DeviceError> for VolumeError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotFound(device) => Self::NotFound(device),
            DeviceError::Busy(device) => Self::DeviceBusy(device),
            other => Self::Device(other),
        }
    }
}
