// SPDX-License-Identifier: GPL-3.0-only

//! The volume manager: registry seeding, event-pump reconciliation,
//! loop attachment with bounded waiting, and the entry points consumed
//! by the presentation layer.
//!
//! All registry mutation happens on the caller's task, either inside a
//! transition method or inside [`VolumeManager::process_pending_events`];
//! the monitor task only forwards OS notifications into a channel. The
//! bounded waits (loop setup, operation gate) pump that channel between
//! polls so the registry stays truthful while they spin.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep};

use shroud_contracts::{DeviceError, DeviceOps, MappingClient, MappingOps, shared_connection};
use shroud_types::{ManagerConfig, Volume, Warning};
use shroud_udisks::{DeviceEvent, DeviceEventKind, subscribe_device_events};

use crate::backend::UdisksBackend;
use crate::error::VolumeError;
use crate::events::{ManagerEvent, VolumeView};
use crate::registry::{LifecycleState, VolumeEntry, VolumeRegistry};

pub struct VolumeManager {
    pub(crate) config: ManagerConfig,
    pub(crate) devices: Arc<dyn DeviceOps>,
    pub(crate) helper: Arc<dyn MappingOps>,
    registry: Mutex<VolumeRegistry>,
    device_events: Mutex<UnboundedReceiver<DeviceEvent>>,
    notifications: UnboundedSender<ManagerEvent>,
    operation_gate: tokio::sync::Mutex<()>,
}

impl VolumeManager {
    /// Build a manager over explicit seams. The returned receiver
    /// carries the add/update/remove/warning notifications.
    pub fn new(
        config: ManagerConfig,
        devices: Arc<dyn DeviceOps>,
        helper: Arc<dyn MappingOps>,
        device_events: UnboundedReceiver<DeviceEvent>,
    ) -> (Self, UnboundedReceiver<ManagerEvent>) {
        let (notifications, rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            devices,
            helper,
            registry: Mutex::new(VolumeRegistry::default()),
            device_events: Mutex::new(device_events),
            notifications,
            operation_gate: tokio::sync::Mutex::new(()),
        };
        (manager, rx)
    }

    /// Connect to the system bus, subscribe to device events, and seed
    /// the registry with every currently resolvable volume.
    pub async fn system(
        config: ManagerConfig,
    ) -> Result<(Self, UnboundedReceiver<ManagerEvent>), VolumeError> {
        let connection = shared_connection().await?.clone();
        let device_events = subscribe_device_events(&connection)
            .await
            .map_err(|e| VolumeError::Device(DeviceError::Failure(e.to_string())))?;

        let helper: Arc<dyn MappingOps> = match config.helper_bus_name.as_deref() {
            Some(name) => Arc::new(MappingClient::with_bus_name(name).await?),
            None => Arc::new(MappingClient::new().await?),
        };
        let devices: Arc<dyn DeviceOps> = Arc::new(UdisksBackend::new(connection));

        let (manager, rx) = Self::new(config, devices, helper, device_events);
        manager.seed().await?;
        Ok((manager, rx))
    }

    /// Resolve and add every block device the OS currently reports.
    /// Devices that stop resolving mid-scan are simply skipped.
    pub async fn seed(&self) -> Result<(), VolumeError> {
        for device_path in self.devices.enumerate().await? {
            match self.devices.resolve(&device_path).await {
                Ok(volume) => self.reconcile_resolved(volume),
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    tracing::warn!(device = %device_path, error = %err, "skipping unresolvable device");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, VolumeRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn notify(&self, event: ManagerEvent) {
        let _ = self.notifications.send(event);
    }

    pub(crate) fn warn(&self, warning: Warning) {
        tracing::warn!(title = %warning.title, "{}", warning.body);
        self.notify(ManagerEvent::Warning(warning));
    }

    fn next_pending_event(&self) -> Option<DeviceEvent> {
        self.device_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .try_recv()
            .ok()
    }

    /// Drain pending device notifications and reconcile the registry.
    /// This is the explicit yield point every bounded wait advances.
    pub async fn process_pending_events(&self) {
        while let Some(event) = self.next_pending_event() {
            self.apply_event(event).await;
        }
    }

    pub(crate) async fn apply_event(&self, event: DeviceEvent) {
        match event.kind {
            DeviceEventKind::Added | DeviceEventKind::Changed => {
                match self.devices.resolve(&event.device_path).await {
                    Ok(volume) => self.reconcile_resolved(volume),
                    Err(err) if err.is_not_found() => self.reconcile_vanished(&event),
                    Err(err) => {
                        tracing::warn!(
                            device = %event.device_path,
                            error = %err,
                            "failed to resolve notified device"
                        );
                    }
                }
            }
            DeviceEventKind::Removed => self.reconcile_vanished(&event),
        }
    }

    /// Fold a fresh snapshot into the registry. Mapper nodes are never
    /// independent entries; they refresh the entry they unlock.
    pub(crate) fn reconcile_resolved(&self, volume: Volume) {
        if volume.is_mapped {
            self.refresh_unlocked_counterpart(volume);
            return;
        }

        let event = {
            let mut registry = self.registry();
            if let Some(mut existing) = registry.remove(&volume.device_path) {
                existing.os = volume;
                let view = VolumeView::from(&existing);
                registry.add(existing);
                ManagerEvent::VolumeUpdated(view)
            } else {
                let entry = VolumeEntry::new(volume);
                tracing::info!(device = entry.device_path(), "adding volume");
                let view = VolumeView::from(&entry);
                registry.add(entry);
                ManagerEvent::VolumeAdded(view)
            }
        };
        self.notify(event);
    }

    fn refresh_unlocked_counterpart(&self, volume: Volume) {
        let event = {
            let mut registry = self.registry();
            let Some(entry) = registry.entry_with_unlocked_object(&volume.object_path) else {
                // A mapping we did not create; nothing to associate.
                return;
            };
            let mounted = volume.is_mounted();
            if let Some(mapping) = entry.unlocked.as_mut() {
                mapping.volume = volume;
            }
            // Keep the machine truthful when the mapping is (un)mounted
            // behind our back.
            if !entry.state.is_transient() {
                entry.state = if mounted {
                    LifecycleState::UnlockedMounted
                } else {
                    LifecycleState::UnlockedUnmounted
                };
            }
            ManagerEvent::VolumeUpdated(VolumeView::from(&*entry))
        };
        self.notify(event);
    }

    /// A device stopped resolving: drop its entry, or clear the unlocked
    /// counterpart of the entry it belonged to.
    fn reconcile_vanished(&self, event: &DeviceEvent) {
        let notification = {
            let mut registry = self.registry();
            if let Some(entry) = registry
                .remove_by_object_path(&event.object_path)
                .or_else(|| registry.remove(&event.device_path))
            {
                tracing::info!(device = entry.device_path(), "removing volume");
                Some(ManagerEvent::VolumeRemoved {
                    device_path: entry.device_path().to_string(),
                })
            } else if let Some(entry) = registry.entry_with_unlocked_object(&event.object_path) {
                if entry.state.is_transient() {
                    None
                } else {
                    // The mapping vanished underneath us; the origin
                    // volume is locked again.
                    entry.unlocked = None;
                    entry.state = LifecycleState::Locked;
                    Some(ManagerEvent::VolumeUpdated(VolumeView::from(&*entry)))
                }
            } else {
                None
            }
        };
        if let Some(notification) = notification {
            self.notify(notification);
        }
    }

    /// Attach a file container, idempotently per backing file.
    ///
    /// Loop-device registration is asynchronous relative to the setup
    /// call, so after requesting it the registry is polled, one pump
    /// plus one quantum of sleep per attempt, until the container
    /// surfaces or the timeout elapses.
    pub async fn attach_file_container(&self, path: &str) -> Result<VolumeView, VolumeError> {
        self.process_pending_events().await;
        if let Some(view) = self.find_container_view(path) {
            tracing::debug!(backing = path, "container already attached");
            return Ok(view);
        }

        let outcome = self.devices.loop_setup(path).await?;
        tracing::debug!(backing = path, object = %outcome.object_path, "requested loop setup");
        if let Some(os_error) = outcome.read_only_fallback {
            self.warn(Warning::new(
                "Container opened read-only",
                format!(
                    "The file container {path} could not be opened with write access. \
                     It was opened read-only instead. You will not be able to modify \
                     the content of the container.\n{os_error}"
                ),
            ));
        }

        let deadline = Instant::now() + self.config.loop_setup_timeout();
        loop {
            self.process_pending_events().await;
            if let Some(view) = self.find_container_view(path) {
                return Ok(view);
            }
            if Instant::now() >= deadline {
                self.warn(Warning::new(
                    "Failed to add container",
                    format!(
                        "Could not add file container {path}: \
                         timeout while waiting for loop setup."
                    ),
                ));
                return Err(VolumeError::LoopSetupTimeout(path.to_string()));
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    fn find_container_view(&self, backing_file: &str) -> Option<VolumeView> {
        self.registry()
            .find_by_backing_file(backing_file)
            .ok()
            .map(VolumeView::from)
    }

    /// Attach (if needed) and unlock a file container. With `open_after`,
    /// an already-unlocked container is not an error; it is mounted and
    /// opened like any other.
    pub async fn unlock_file_container(
        &self,
        path: &str,
        name: &str,
        passphrase: &str,
        open_after: bool,
    ) -> Result<VolumeView, VolumeError> {
        let view = self.attach_file_container(path).await?;
        match self.unlock_volume(&view.device_path, name, passphrase).await {
            Ok(()) => {}
            Err(VolumeError::AlreadyUnlocked(_)) if open_after => {}
            Err(err) => return Err(err),
        }
        if open_after {
            self.mount_volume(&view.device_path).await?;
        }
        self.volume_view(&view.device_path)
            .ok_or_else(|| VolumeError::NotFound(view.device_path))
    }

    /// Attach (if needed) and mount a file container; returns the mount
    /// point. The container must already be unlocked.
    pub async fn open_file_container(&self, path: &str) -> Result<String, VolumeError> {
        let view = self.attach_file_container(path).await?;
        self.mount_volume(&view.device_path).await
    }

    /// Acquire the single privileged-operation slot.
    ///
    /// The helper's mapping table is the one globally shared resource;
    /// the gate is polled non-blockingly so the event pump keeps running
    /// while it is contended.
    pub(crate) async fn acquire_operation_slot(&self) -> tokio::sync::MutexGuard<'_, ()> {
        loop {
            if let Ok(slot) = self.operation_gate.try_lock() {
                return slot;
            }
            self.process_pending_events().await;
            sleep(self.config.poll_interval()).await;
        }
    }

    pub fn volume_view(&self, device_path: &str) -> Option<VolumeView> {
        self.registry().get(device_path).map(VolumeView::from)
    }

    pub fn container_views(&self) -> Vec<VolumeView> {
        self.registry().containers().iter().map(VolumeView::from).collect()
    }

    pub fn attached_device_views(&self) -> Vec<VolumeView> {
        self.registry()
            .attached_devices()
            .iter()
            .map(VolumeView::from)
            .collect()
    }
}
