// SPDX-License-Identifier: GPL-3.0-only

//! Resolved block-device snapshot shared by the device layer and the manager.

use serde::{Deserialize, Serialize};

use crate::naming::is_mapped_device_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeClass {
    /// A regular file exposed as a block device through a loop device,
    /// directly or through a partition table on the loop device.
    FileContainer,
    /// A physically connected drive or partition.
    AttachedDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    Unmounted,
    Mounted,
}

/// Point-in-time view of a block device as the resolver saw it.
///
/// A snapshot is rebuilt from live OS state on every resolve; nothing in
/// it is carried over from a previous resolution, so `class` can never go
/// stale relative to the loop/partition facts it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// OS block-device path, e.g. `/dev/loop5`. Stable identity while the
    /// device exists.
    pub device_path: String,
    /// UDisks2 block object path for the device.
    pub object_path: String,
    pub class: VolumeClass,
    /// Backing file path, present for loop-backed volumes.
    pub backing_file: Option<String>,
    /// The device itself carries a loop interface.
    pub is_loop: bool,
    pub is_partition: bool,
    /// The device is a device-mapper node (`/dev/dm-*` or `/dev/mapper/*`).
    pub is_mapped: bool,
    /// Object path of the loop interface backing this volume: its own, or
    /// the partition table's when this is a partition of a loop device.
    pub loop_object_path: Option<String>,
    pub has_filesystem: bool,
    pub mount_points: Vec<String>,
    pub size: u64,
    pub read_only: bool,
    pub label: String,
}

impl Volume {
    pub fn is_file_container(&self) -> bool {
        self.class == VolumeClass::FileContainer
    }

    pub fn is_mounted(&self) -> bool {
        !self.mount_points.is_empty()
    }

    pub fn mount_state(&self) -> MountState {
        if self.is_mounted() {
            MountState::Mounted
        } else {
            MountState::Unmounted
        }
    }

    /// The volume sits on a loop device, directly or through a partition
    /// table, and can therefore be detached by deleting that loop device.
    pub fn is_loop_backed(&self) -> bool {
        self.loop_object_path.is_some()
    }
}

/// Derive the classification of a resolved device.
///
/// Loop devices and partitions carved out of a loop device expose a file
/// container; everything else is a directly attached device. Mapped
/// devices are associated with their origin volume at unlock time by
/// naming convention and are never classified independently here.
pub fn classify(device_path: &str, is_loop: bool, loop_backed_partition: bool) -> VolumeClass {
    if is_loop || loop_backed_partition || device_path.starts_with("/dev/loop") {
        VolumeClass::FileContainer
    } else {
        VolumeClass::AttachedDevice
    }
}

impl Volume {
    /// Minimal snapshot for a device that can no longer be resolved, used
    /// when tearing down registry entries after a removal notification.
    pub fn vanished(device_path: impl Into<String>, object_path: impl Into<String>) -> Self {
        let device_path = device_path.into();
        let is_mapped = is_mapped_device_path(&device_path);
        Self {
            class: classify(&device_path, false, false),
            object_path: object_path.into(),
            backing_file: None,
            is_loop: false,
            is_partition: false,
            is_mapped,
            loop_object_path: None,
            has_filesystem: false,
            mount_points: Vec::new(),
            size: 0,
            read_only: false,
            label: String::new(),
            device_path,
        }
    }
}
