// SPDX-License-Identifier: GPL-3.0-only

//! Per-volume lifecycle transitions: unlock, mount, unmount, lock,
//! detach.
//!
//! Each transition sets its transient state before touching the helper
//! or the OS, and finalizes (or reverts) it afterwards; a transition
//! that fails mid-flight leaves the volume in its last-known-good state
//! and never invents a record for a half-completed operation.

use shroud_contracts::DeviceError;
use shroud_types::{Volume, mapped_device_path};

use crate::error::VolumeError;
use crate::events::{ManagerEvent, VolumeView};
use crate::manager::VolumeManager;
use crate::registry::{LifecycleState, UnlockedMapping};

impl VolumeManager {
    /// Unlock a volume: defensively remove any stale mapping of the same
    /// name, map the device, and resolve the unlocked counterpart under
    /// its conventional mapper path.
    pub async fn unlock_volume(
        &self,
        device_path: &str,
        name: &str,
        passphrase: &str,
    ) -> Result<(), VolumeError> {
        {
            let mut registry = self.registry();
            let entry = registry
                .get_mut(device_path)
                .ok_or_else(|| VolumeError::NotFound(device_path.to_string()))?;
            match entry.state {
                LifecycleState::Locked => entry.state = LifecycleState::Unlocking,
                state if state.is_unlocked() => {
                    return Err(VolumeError::AlreadyUnlocked(device_path.to_string()));
                }
                _ => return Err(VolumeError::TransitionInProgress(device_path.to_string())),
            }
        }
        tracing::info!(device = device_path, name, "unlocking volume");

        match self.do_unlock(device_path, name, passphrase).await {
            Ok(counterpart) => {
                let event = {
                    let mut registry = self.registry();
                    let Some(entry) = registry.get_mut(device_path) else {
                        // The device vanished while the mapping came up;
                        // the next reconciliation pass owns the cleanup.
                        return Err(VolumeError::NotFound(device_path.to_string()));
                    };
                    entry.unlocked = Some(UnlockedMapping {
                        name: name.to_string(),
                        volume: counterpart,
                    });
                    entry.state = LifecycleState::UnlockedUnmounted;
                    ManagerEvent::VolumeUpdated(VolumeView::from(&*entry))
                };
                self.notify(event);
                Ok(())
            }
            Err(err) => {
                // No partial state survives a failed unlock.
                self.revert_state(device_path, LifecycleState::Locked);
                Err(err)
            }
        }
    }

    async fn do_unlock(
        &self,
        device_path: &str,
        name: &str,
        passphrase: &str,
    ) -> Result<Volume, VolumeError> {
        let _slot = self.acquire_operation_slot().await;

        // Clear any stale mapping of the same name left behind by a
        // previous crashed session; a miss is expected here.
        if let Err(err) = self.helper.remove(name).await {
            tracing::debug!(name, error = %err, "defensive remove failed");
        }

        let mapped = self
            .helper
            .mount_or_create(name, passphrase, device_path)
            .await?;
        if !mapped {
            return Err(VolumeError::OperationFailed {
                operation: "mount-or-create",
                name: name.to_string(),
            });
        }

        // The mapping surfaces under the fixed prefix; it is found by
        // name, never by scanning the mapper table.
        Ok(self.devices.resolve(&mapped_device_path(name)).await?)
    }

    /// Mount the unlocked counterpart, initializing its filesystem first
    /// when it has none. Returns the mount point.
    pub async fn mount_volume(&self, device_path: &str) -> Result<String, VolumeError> {
        let mapping = {
            let mut registry = self.registry();
            let entry = registry
                .get_mut(device_path)
                .ok_or_else(|| VolumeError::NotFound(device_path.to_string()))?;
            match entry.state {
                LifecycleState::UnlockedMounted => {
                    return entry
                        .unlocked
                        .as_ref()
                        .and_then(|u| u.volume.mount_points.first().cloned())
                        .ok_or_else(|| {
                            VolumeError::Device(DeviceError::Failure(format!(
                                "{device_path} is mounted but no mount point is recorded"
                            )))
                        });
                }
                LifecycleState::UnlockedUnmounted => {}
                LifecycleState::Locked | LifecycleState::Locking => {
                    return Err(VolumeError::NotUnlocked(device_path.to_string()));
                }
                _ => return Err(VolumeError::TransitionInProgress(device_path.to_string())),
            }
            let Some(mapping) = entry.unlocked.clone() else {
                return Err(VolumeError::NotUnlocked(device_path.to_string()));
            };
            entry.state = LifecycleState::Mounting;
            mapping
        };
        tracing::info!(device = device_path, "mounting volume");

        match self.do_mount(&mapping).await {
            Ok(mount_point) => {
                let refreshed = self.devices.resolve(&mapping.volume.device_path).await.ok();
                let event = {
                    let mut registry = self.registry();
                    let Some(entry) = registry.get_mut(device_path) else {
                        return Ok(mount_point);
                    };
                    entry.state = LifecycleState::UnlockedMounted;
                    if let (Some(current), Some(volume)) = (entry.unlocked.as_mut(), refreshed) {
                        current.volume = volume;
                    }
                    ManagerEvent::VolumeUpdated(VolumeView::from(&*entry))
                };
                self.notify(event);
                Ok(mount_point)
            }
            Err(err) => {
                self.revert_state(device_path, LifecycleState::UnlockedUnmounted);
                Err(err)
            }
        }
    }

    async fn do_mount(&self, mapping: &UnlockedMapping) -> Result<String, VolumeError> {
        let object_path = &mapping.volume.object_path;

        // Content initialization is implicit and happens exactly once,
        // detected by the absence of filesystem metadata.
        if !self.devices.has_filesystem(object_path).await? {
            let _slot = self.acquire_operation_slot().await;
            tracing::info!(name = %mapping.name, "initializing ext4 filesystem on mapping");
            if !self.helper.mkfs_ext4(&mapping.name).await? {
                return Err(VolumeError::OperationFailed {
                    operation: "mkfs-ext4",
                    name: mapping.name.clone(),
                });
            }
        }

        Ok(self.devices.mount(object_path).await?)
    }

    /// Unmount the unlocked counterpart. Unmounting an already-unmounted
    /// volume is a no-op.
    pub async fn unmount_volume(&self, device_path: &str) -> Result<(), VolumeError> {
        let mapping = {
            let mut registry = self.registry();
            let entry = registry
                .get_mut(device_path)
                .ok_or_else(|| VolumeError::NotFound(device_path.to_string()))?;
            match entry.state {
                LifecycleState::UnlockedUnmounted => return Ok(()),
                LifecycleState::UnlockedMounted => {}
                LifecycleState::Locked | LifecycleState::Locking => {
                    return Err(VolumeError::NotUnlocked(device_path.to_string()));
                }
                _ => return Err(VolumeError::TransitionInProgress(device_path.to_string())),
            }
            let Some(mapping) = entry.unlocked.clone() else {
                return Err(VolumeError::NotUnlocked(device_path.to_string()));
            };
            entry.state = LifecycleState::Unmounting;
            mapping
        };
        tracing::info!(device = device_path, "unmounting volume");

        match self.do_unmount(&mapping.volume.object_path).await {
            Ok(()) => {
                let refreshed = self.devices.resolve(&mapping.volume.device_path).await.ok();
                let event = {
                    let mut registry = self.registry();
                    let Some(entry) = registry.get_mut(device_path) else {
                        return Ok(());
                    };
                    entry.state = LifecycleState::UnlockedUnmounted;
                    if let (Some(current), Some(volume)) = (entry.unlocked.as_mut(), refreshed) {
                        current.volume = volume;
                    }
                    ManagerEvent::VolumeUpdated(VolumeView::from(&*entry))
                };
                self.notify(event);
                Ok(())
            }
            Err(err) => {
                self.revert_state(device_path, LifecycleState::UnlockedMounted);
                Err(err)
            }
        }
    }

    /// Unmount until no mount points remain. An already-not-mounted
    /// error after at least one successful call is normal completion,
    /// not a failure.
    async fn do_unmount(&self, object_path: &str) -> Result<(), VolumeError> {
        let mut unmounted_once = false;
        while !self.devices.mount_points(object_path).await?.is_empty() {
            match self.devices.unmount(object_path).await {
                Ok(()) => unmounted_once = true,
                Err(DeviceError::NotMounted(_)) if unmounted_once => return Ok(()),
                Err(DeviceError::Busy(device)) => return Err(VolumeError::DeviceBusy(device)),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Lock a volume by removing its mapping. A mounted volume is
    /// unmounted on the way down. If removal fails the volume stays
    /// unlocked and the error is surfaced, never swallowed.
    pub async fn lock_volume(&self, device_path: &str) -> Result<(), VolumeError> {
        let mounted = matches!(
            self.registry().get(device_path).map(|e| e.state),
            Some(LifecycleState::UnlockedMounted)
        );
        if mounted {
            self.unmount_volume(device_path).await?;
        }

        let (mapping, loop_object) = {
            let mut registry = self.registry();
            let entry = registry
                .get_mut(device_path)
                .ok_or_else(|| VolumeError::NotFound(device_path.to_string()))?;
            match entry.state {
                LifecycleState::Locked => return Ok(()),
                LifecycleState::UnlockedUnmounted => {}
                _ => return Err(VolumeError::TransitionInProgress(device_path.to_string())),
            }
            let Some(mapping) = entry.unlocked.clone() else {
                return Err(VolumeError::NotUnlocked(device_path.to_string()));
            };
            entry.state = LifecycleState::Locking;
            (mapping, entry.os.loop_object_path.clone())
        };
        tracing::info!(device = device_path, name = %mapping.name, "locking volume");

        // Let the loop device clear itself once the mapping over it is
        // gone.
        if let Some(loop_object) = &loop_object
            && let Err(err) = self.devices.set_loop_autoclear(loop_object, true).await
        {
            tracing::warn!(device = device_path, error = %err, "failed to set loop autoclear");
        }

        let removed = {
            let _slot = self.acquire_operation_slot().await;
            self.helper.remove(&mapping.name).await
        };
        match removed {
            Ok(true) => {
                let event = {
                    let mut registry = self.registry();
                    let Some(entry) = registry.get_mut(device_path) else {
                        return Ok(());
                    };
                    entry.unlocked = None;
                    entry.state = LifecycleState::Locked;
                    ManagerEvent::VolumeUpdated(VolumeView::from(&*entry))
                };
                self.notify(event);
                Ok(())
            }
            Ok(false) => {
                self.revert_state(device_path, LifecycleState::UnlockedUnmounted);
                Err(VolumeError::OperationFailed {
                    operation: "remove",
                    name: mapping.name,
                })
            }
            Err(err) => {
                self.revert_state(device_path, LifecycleState::UnlockedUnmounted);
                Err(err.into())
            }
        }
    }

    /// Delete the loop device under a locked, loop-backed file
    /// container. The registry entry goes away when the removal
    /// notification arrives.
    pub async fn detach_volume(&self, device_path: &str) -> Result<(), VolumeError> {
        let loop_object = {
            let registry = self.registry();
            let entry = registry
                .get(device_path)
                .ok_or_else(|| VolumeError::NotFound(device_path.to_string()))?;
            match entry.state {
                LifecycleState::Locked => {}
                state if state.is_unlocked() => {
                    return Err(VolumeError::AlreadyUnlocked(device_path.to_string()));
                }
                _ => return Err(VolumeError::TransitionInProgress(device_path.to_string())),
            }
            entry
                .os
                .loop_object_path
                .clone()
                .ok_or_else(|| VolumeError::NotDetachable(device_path.to_string()))?
        };
        tracing::info!(device = device_path, "detaching loop device");

        self.devices.loop_delete(&loop_object).await?;
        Ok(())
    }

    pub(crate) fn revert_state(&self, device_path: &str, state: LifecycleState) {
        let mut registry = self.registry();
        if let Some(entry) = registry.get_mut(device_path) {
            entry.state = state;
        }
    }
}
