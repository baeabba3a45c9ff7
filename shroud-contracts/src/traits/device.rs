// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use shroud_types::Volume;

use crate::DeviceError;

/// Result of exposing a backing file as a loop device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSetupOutcome {
    /// UDisks2 object path of the new loop device.
    pub object_path: String,
    /// Set when the backing file could not be opened read-write and was
    /// opened read-only instead; carries the OS error message.
    pub read_only_fallback: Option<String>,
}

/// OS-facing block-device surface consumed by the volume manager.
///
/// The production implementation talks to UDisks2; tests substitute a
/// scripted fake. Loop-device registration is asynchronous relative to
/// `loop_setup`: the new device only becomes resolvable once the event
/// stream has delivered its addition.
#[async_trait]
pub trait DeviceOps: Send + Sync {
    /// Device paths of all block devices currently known to the OS.
    async fn enumerate(&self) -> Result<Vec<String>, DeviceError>;

    /// Resolve a device path to a fresh snapshot of its state.
    async fn resolve(&self, device_path: &str) -> Result<Volume, DeviceError>;

    async fn loop_setup(&self, backing_file: &str) -> Result<LoopSetupOutcome, DeviceError>;

    async fn loop_delete(&self, loop_object_path: &str) -> Result<(), DeviceError>;

    async fn set_loop_autoclear(
        &self,
        loop_object_path: &str,
        value: bool,
    ) -> Result<(), DeviceError>;

    /// Mount the filesystem on a block object; returns the mount point.
    async fn mount(&self, object_path: &str) -> Result<String, DeviceError>;

    async fn unmount(&self, object_path: &str) -> Result<(), DeviceError>;

    async fn mount_points(&self, object_path: &str) -> Result<Vec<String>, DeviceError>;

    async fn has_filesystem(&self, object_path: &str) -> Result<bool, DeviceError>;
}
