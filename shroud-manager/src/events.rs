// SPDX-License-Identifier: GPL-3.0-only

//! Notifications produced for the presentation layer.

use shroud_types::{MountState, Warning, VolumeClass};

use crate::registry::VolumeEntry;

/// What a consumer needs to render one volume row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeView {
    pub device_path: String,
    pub class: VolumeClass,
    pub backing_file: Option<String>,
    pub label: String,
    pub size: u64,
    pub read_only: bool,
    pub is_unlocked: bool,
    pub mount_state: Option<MountState>,
    pub unlocked_device_path: Option<String>,
}

impl From<&VolumeEntry> for VolumeView {
    fn from(entry: &VolumeEntry) -> Self {
        Self {
            device_path: entry.os.device_path.clone(),
            class: entry.os.class,
            backing_file: entry.os.backing_file.clone(),
            label: entry.os.label.clone(),
            size: entry.os.size,
            read_only: entry.os.read_only,
            is_unlocked: entry.is_unlocked(),
            mount_state: entry.mount_state(),
            unlocked_device_path: entry
                .unlocked
                .as_ref()
                .map(|u| u.volume.device_path.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    VolumeAdded(VolumeView),
    VolumeUpdated(VolumeView),
    VolumeRemoved { device_path: String },
    Warning(Warning),
}
