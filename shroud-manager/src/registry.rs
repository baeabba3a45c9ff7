// SPDX-License-Identifier: GPL-3.0-only

//! The reconciliation index: two classified, ordered collections keyed
//! by device path, kept consistent with device-event traffic.

use shroud_types::{MountState, Volume, VolumeClass};

use crate::error::VolumeError;

/// Lifecycle position of a volume. The transient states are held while a
/// transition's privileged call is in flight; while one is set, no other
/// transition is accepted for the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Locked,
    Unlocking,
    UnlockedUnmounted,
    Mounting,
    UnlockedMounted,
    Unmounting,
    Locking,
}

impl LifecycleState {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unlocking | Self::Mounting | Self::Unmounting | Self::Locking
        )
    }

    pub fn is_unlocked(self) -> bool {
        matches!(
            self,
            Self::UnlockedUnmounted | Self::Mounting | Self::UnlockedMounted | Self::Unmounting
        )
    }
}

/// The unlocked counterpart of a volume: the helper-created mapping name
/// and the resolved snapshot of the mapped device. Holding name and
/// snapshot together keeps "mapped name present iff unlocked object
/// present" true by construction.
#[derive(Debug, Clone)]
pub struct UnlockedMapping {
    /// Caller-supplied mapping name (the helper prepends the fixed prefix).
    pub name: String,
    pub volume: Volume,
}

/// One volume as the registry tracks it: the latest OS snapshot plus the
/// lifecycle fields that survive reconciliation.
#[derive(Debug, Clone)]
pub struct VolumeEntry {
    pub os: Volume,
    pub state: LifecycleState,
    pub unlocked: Option<UnlockedMapping>,
}

impl VolumeEntry {
    pub fn new(os: Volume) -> Self {
        Self {
            os,
            state: LifecycleState::Locked,
            unlocked: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.os.device_path
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_some()
    }

    /// Mount state of the unlocked counterpart; meaningless while locked.
    pub fn mount_state(&self) -> Option<MountState> {
        match self.state {
            LifecycleState::UnlockedMounted | LifecycleState::Unmounting => {
                Some(MountState::Mounted)
            }
            LifecycleState::UnlockedUnmounted | LifecycleState::Mounting => {
                Some(MountState::Unmounted)
            }
            _ => None,
        }
    }
}

/// Ordered collection of entries keyed by device path.
#[derive(Debug, Default)]
pub struct VolumeIndex {
    entries: Vec<VolumeEntry>,
}

impl VolumeIndex {
    fn position(&self, device_path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.device_path() == device_path)
    }

    pub fn contains(&self, device_path: &str) -> bool {
        self.position(device_path).is_some()
    }

    pub fn get(&self, device_path: &str) -> Option<&VolumeEntry> {
        self.position(device_path).map(|i| &self.entries[i])
    }

    pub fn get_mut(&mut self, device_path: &str) -> Option<&mut VolumeEntry> {
        self.position(device_path).map(|i| &mut self.entries[i])
    }

    /// Insert, replacing in place when the device path is already present.
    pub fn insert(&mut self, entry: VolumeEntry) {
        match self.position(entry.device_path()) {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, device_path: &str) -> Option<VolumeEntry> {
        self.position(device_path).map(|i| self.entries.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VolumeEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VolumeEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The two classified collections. Classification decides where an entry
/// lives; adding an entry whose class changed moves it between them.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    containers: VolumeIndex,
    devices: VolumeIndex,
}

impl VolumeRegistry {
    pub fn containers(&self) -> &VolumeIndex {
        &self.containers
    }

    pub fn attached_devices(&self) -> &VolumeIndex {
        &self.devices
    }

    pub fn add(&mut self, entry: VolumeEntry) {
        match entry.os.class {
            VolumeClass::FileContainer => {
                self.devices.remove(entry.device_path());
                self.containers.insert(entry);
            }
            VolumeClass::AttachedDevice => {
                self.containers.remove(entry.device_path());
                self.devices.insert(entry);
            }
        }
    }

    pub fn remove(&mut self, device_path: &str) -> Option<VolumeEntry> {
        self.containers
            .remove(device_path)
            .or_else(|| self.devices.remove(device_path))
    }

    /// Remove then add, so the entry also moves to the end of its
    /// collection (fresh arrivals and updates list last).
    pub fn update(&mut self, entry: VolumeEntry) {
        self.remove(entry.device_path());
        self.add(entry);
    }

    pub fn get(&self, device_path: &str) -> Option<&VolumeEntry> {
        self.containers
            .get(device_path)
            .or_else(|| self.devices.get(device_path))
    }

    pub fn get_mut(&mut self, device_path: &str) -> Option<&mut VolumeEntry> {
        if self.containers.contains(device_path) {
            self.containers.get_mut(device_path)
        } else {
            self.devices.get_mut(device_path)
        }
    }

    pub fn find_by_backing_file(&self, path: &str) -> Result<&VolumeEntry, VolumeError> {
        self.containers
            .iter()
            .find(|e| e.os.backing_file.as_deref() == Some(path))
            .ok_or_else(|| VolumeError::NotFound(path.to_string()))
    }

    pub fn remove_by_object_path(&mut self, object_path: &str) -> Option<VolumeEntry> {
        let device_path = self
            .containers
            .iter()
            .chain(self.devices.iter())
            .find(|e| e.os.object_path == object_path)
            .map(|e| e.device_path().to_string())?;
        self.remove(&device_path)
    }

    /// Entry whose unlocked counterpart is the given block object, for
    /// keeping the counterpart snapshot fresh under `Changed` traffic.
    pub fn entry_with_unlocked_object(&mut self, object_path: &str) -> Option<&mut VolumeEntry> {
        self.containers
            .iter_mut()
            .chain(self.devices.iter_mut())
            .find(|e| {
                e.unlocked
                    .as_ref()
                    .is_some_and(|u| u.volume.object_path == object_path)
            })
    }
}
