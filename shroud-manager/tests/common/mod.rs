// SPDX-License-Identifier: GPL-3.0-only

//! Scripted fakes for both seams, so the lifecycle suites run without a
//! system bus, a helper process, or real block devices.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use shroud_contracts::{DeviceError, DeviceOps, HelperError, LoopSetupOutcome, MappingOps};
use shroud_manager::{ManagerEvent, VolumeManager};
use shroud_types::{ManagerConfig, Volume, VolumeClass, Warning, mapped_device_path};
use shroud_udisks::{DeviceEvent, DeviceEventKind};

pub fn loop_volume(index: u32, backing: &str) -> Volume {
    let object_path = format!("/org/freedesktop/UDisks2/block_devices/loop{index}");
    Volume {
        device_path: format!("/dev/loop{index}"),
        object_path: object_path.clone(),
        class: VolumeClass::FileContainer,
        backing_file: Some(backing.to_string()),
        is_loop: true,
        is_partition: false,
        is_mapped: false,
        loop_object_path: Some(object_path),
        has_filesystem: false,
        mount_points: Vec::new(),
        size: 64 * 1024 * 1024,
        read_only: false,
        label: String::new(),
    }
}

pub fn mapped_volume(name: &str, serial: u32, has_filesystem: bool) -> Volume {
    Volume {
        device_path: mapped_device_path(name),
        object_path: format!("/org/freedesktop/UDisks2/block_devices/dm_2d{serial}"),
        class: VolumeClass::AttachedDevice,
        backing_file: None,
        is_loop: false,
        is_partition: false,
        is_mapped: true,
        loop_object_path: None,
        has_filesystem,
        mount_points: Vec::new(),
        size: 64 * 1024 * 1024,
        read_only: false,
        label: String::new(),
    }
}

/// One scripted response for an unmount call. `OkButStale` reports
/// success without clearing the mount listing, the way a bind mount or a
/// racing lister can leave a stale entry behind.
pub enum ScriptedUnmount {
    OkButStale,
    Error(DeviceError),
}

#[derive(Default)]
pub struct DeviceState {
    pub volumes: HashMap<String, Volume>,
    pub materialize_loops: bool,
    pub read_only_fallback: Option<String>,
    pub next_loop_index: u32,
    pub loop_setup_calls: usize,
    pub unmount_script: VecDeque<ScriptedUnmount>,
}

pub struct FakeDevices {
    pub state: Mutex<DeviceState>,
    events: UnboundedSender<DeviceEvent>,
}

impl FakeDevices {
    pub fn new(events: UnboundedSender<DeviceEvent>) -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state poisoned")
    }

    pub fn set_materialize(&self, value: bool) {
        self.lock().materialize_loops = value;
    }

    pub fn set_read_only_fallback(&self, message: &str) {
        self.lock().read_only_fallback = Some(message.to_string());
    }

    pub fn script_unmount(&self, script: Vec<ScriptedUnmount>) {
        self.lock().unmount_script = script.into();
    }

    pub fn loop_setup_calls(&self) -> usize {
        self.lock().loop_setup_calls
    }

    fn send(&self, kind: DeviceEventKind, object_path: &str, device_path: &str) {
        let _ = self.events.send(DeviceEvent {
            kind,
            object_path: object_path.to_string(),
            device_path: device_path.to_string(),
        });
    }

    /// Insert a volume and deliver its `Added` notification.
    pub fn add_volume(&self, volume: Volume) {
        let (object_path, device_path) = (volume.object_path.clone(), volume.device_path.clone());
        self.lock().volumes.insert(device_path.clone(), volume);
        self.send(DeviceEventKind::Added, &object_path, &device_path);
    }

    /// Re-deliver a notification for a volume that is already present.
    pub fn announce(&self, kind: DeviceEventKind, device_path: &str) {
        let volume = self
            .lock()
            .volumes
            .get(device_path)
            .cloned()
            .expect("announced volume must exist");
        self.send(kind, &volume.object_path, &volume.device_path);
    }

    /// Drop a volume and deliver its `Removed` notification.
    pub fn remove_volume(&self, device_path: &str) {
        let removed = self.lock().volumes.remove(device_path);
        if let Some(volume) = removed {
            self.send(DeviceEventKind::Removed, &volume.object_path, &volume.device_path);
        }
    }

    fn device_path_for_object(&self, object_path: &str) -> Option<String> {
        self.lock()
            .volumes
            .values()
            .find(|v| v.object_path == object_path)
            .map(|v| v.device_path.clone())
    }
}

#[async_trait]
impl DeviceOps for FakeDevices {
    async fn enumerate(&self) -> Result<Vec<String>, DeviceError> {
        Ok(self.lock().volumes.keys().cloned().collect())
    }

    async fn resolve(&self, device_path: &str) -> Result<Volume, DeviceError> {
        self.lock()
            .volumes
            .get(device_path)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(device_path.to_string()))
    }

    async fn loop_setup(&self, backing_file: &str) -> Result<LoopSetupOutcome, DeviceError> {
        let (volume, outcome, materialize) = {
            let mut state = self.lock();
            state.loop_setup_calls += 1;
            let volume = loop_volume(state.next_loop_index, backing_file);
            state.next_loop_index += 1;
            let outcome = LoopSetupOutcome {
                object_path: volume.object_path.clone(),
                read_only_fallback: state.read_only_fallback.clone(),
            };
            if state.materialize_loops {
                state
                    .volumes
                    .insert(volume.device_path.clone(), volume.clone());
            }
            (volume, outcome, state.materialize_loops)
        };
        if materialize {
            self.send(DeviceEventKind::Added, &volume.object_path, &volume.device_path);
        }
        Ok(outcome)
    }

    async fn loop_delete(&self, loop_object_path: &str) -> Result<(), DeviceError> {
        let device_path = self
            .lock()
            .volumes
            .values()
            .find(|v| v.loop_object_path.as_deref() == Some(loop_object_path))
            .map(|v| v.device_path.clone())
            .ok_or_else(|| DeviceError::NotFound(loop_object_path.to_string()))?;
        self.remove_volume(&device_path);
        Ok(())
    }

    async fn set_loop_autoclear(&self, _object: &str, _value: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn mount(&self, object_path: &str) -> Result<String, DeviceError> {
        let (device_path, mount_point) = {
            let mut state = self.lock();
            let volume = state
                .volumes
                .values_mut()
                .find(|v| v.object_path == object_path)
                .ok_or_else(|| DeviceError::NotFound(object_path.to_string()))?;
            if !volume.has_filesystem {
                return Err(DeviceError::Failure(format!(
                    "{} has no filesystem",
                    volume.device_path
                )));
            }
            let mount_point = format!(
                "/run/media/test/{}",
                volume.device_path.trim_start_matches("/dev/").replace('/', "_")
            );
            volume.mount_points.push(mount_point.clone());
            (volume.device_path.clone(), mount_point)
        };
        self.send(DeviceEventKind::Changed, object_path, &device_path);
        Ok(mount_point)
    }

    async fn unmount(&self, object_path: &str) -> Result<(), DeviceError> {
        let device_path = {
            let mut state = self.lock();
            if let Some(scripted) = state.unmount_script.pop_front() {
                return match scripted {
                    ScriptedUnmount::OkButStale => Ok(()),
                    ScriptedUnmount::Error(err) => Err(err),
                };
            }
            let volume = state
                .volumes
                .values_mut()
                .find(|v| v.object_path == object_path)
                .ok_or_else(|| DeviceError::NotFound(object_path.to_string()))?;
            if volume.mount_points.is_empty() {
                return Err(DeviceError::NotMounted(volume.device_path.clone()));
            }
            volume.mount_points.pop();
            volume.device_path.clone()
        };
        self.send(DeviceEventKind::Changed, object_path, &device_path);
        Ok(())
    }

    async fn mount_points(&self, object_path: &str) -> Result<Vec<String>, DeviceError> {
        Ok(self
            .lock()
            .volumes
            .values()
            .find(|v| v.object_path == object_path)
            .map(|v| v.mount_points.clone())
            .unwrap_or_default())
    }

    async fn has_filesystem(&self, object_path: &str) -> Result<bool, DeviceError> {
        Ok(self
            .lock()
            .volumes
            .values()
            .find(|v| v.object_path == object_path)
            .map(|v| v.has_filesystem)
            .unwrap_or(false))
    }
}

#[derive(Default)]
pub struct HelperState {
    pub refuse_mount_or_create: bool,
    pub refuse_remove: bool,
    /// Mappings come up with a filesystem already present, as if the
    /// container carried existing content.
    pub existing_content: bool,
    pub call_delay: Duration,
    pub next_serial: u32,
    pub mappings: HashMap<String, String>,
    pub calls: Vec<String>,
}

/// Fake privileged helper. Tracks in-flight call concurrency so the
/// mutual-exclusion contract is observable from tests.
pub struct FakeHelper {
    devices: Arc<FakeDevices>,
    pub state: Mutex<HelperState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeHelper {
    pub fn new(devices: Arc<FakeDevices>) -> Self {
        Self {
            devices,
            state: Mutex::new(HelperState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HelperState> {
        self.state.lock().expect("helper state poisoned")
    }

    pub fn set_refuse_mount_or_create(&self, value: bool) {
        self.lock().refuse_mount_or_create = value;
    }

    pub fn set_refuse_remove(&self, value: bool) {
        self.lock().refuse_remove = value;
    }

    pub fn set_existing_content(&self, value: bool) {
        self.lock().existing_content = value;
    }

    pub fn set_call_delay(&self, delay: Duration) {
        self.lock().call_delay = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn has_mapping(&self, name: &str) -> bool {
        self.lock().mappings.contains_key(name)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn begin_call(&self, name: &str) {
        let delay = {
            let mut state = self.lock();
            state.calls.push(name.to_string());
            state.call_delay
        };
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn end_call(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn materialize_mapping(&self, name: &str, with_filesystem: bool) {
        let serial = {
            let mut state = self.lock();
            state.next_serial += 1;
            state.next_serial
        };
        let volume = mapped_volume(name, serial, with_filesystem);
        self.lock()
            .mappings
            .insert(name.to_string(), volume.device_path.clone());
        self.devices.add_volume(volume);
    }
}

#[async_trait]
impl MappingOps for FakeHelper {
    async fn create(
        &self,
        name: &str,
        _passphrase: &str,
        _source_device: &str,
    ) -> Result<bool, HelperError> {
        self.begin_call("create").await;
        self.materialize_mapping(name, false);
        self.end_call();
        Ok(true)
    }

    async fn mount_or_create(
        &self,
        name: &str,
        _passphrase: &str,
        _source_device: &str,
    ) -> Result<bool, HelperError> {
        self.begin_call("mount_or_create").await;
        let (refuse, existing) = {
            let state = self.lock();
            (state.refuse_mount_or_create, state.existing_content)
        };
        if !refuse {
            self.materialize_mapping(name, existing);
        }
        self.end_call();
        Ok(!refuse)
    }

    async fn remove(&self, name: &str) -> Result<bool, HelperError> {
        self.begin_call("remove").await;
        let (refuse, device_path) = {
            let mut state = self.lock();
            if state.refuse_remove {
                (true, None)
            } else {
                (false, state.mappings.remove(name))
            }
        };
        let removed = if refuse {
            false
        } else if let Some(device_path) = device_path {
            self.devices.remove_volume(&device_path);
            true
        } else {
            false
        };
        self.end_call();
        Ok(removed)
    }

    async fn mount(
        &self,
        name: &str,
        _passphrase: &str,
        _source_device: &str,
    ) -> Result<bool, HelperError> {
        self.begin_call("mount").await;
        let existing = self.lock().existing_content;
        if existing {
            self.materialize_mapping(name, true);
        }
        self.end_call();
        Ok(existing)
    }

    async fn mkfs_ext4(&self, name: &str) -> Result<bool, HelperError> {
        self.begin_call("mkfs_ext4").await;
        let device_path = self.lock().mappings.get(name).cloned();
        let formatted = if let Some(device_path) = device_path {
            let object_path = {
                let mut state = self.devices.lock();
                match state.volumes.get_mut(&device_path) {
                    Some(volume) => {
                        volume.has_filesystem = true;
                        Some(volume.object_path.clone())
                    }
                    None => None,
                }
            };
            if let Some(object_path) = object_path {
                self.devices
                    .send(DeviceEventKind::Changed, &object_path, &device_path);
            }
            true
        } else {
            false
        };
        self.end_call();
        Ok(formatted)
    }
}

pub struct Harness {
    pub manager: Arc<VolumeManager>,
    pub devices: Arc<FakeDevices>,
    pub helper: Arc<FakeHelper>,
    pub notifications: UnboundedReceiver<ManagerEvent>,
}

pub fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let devices = Arc::new(FakeDevices::new(events_tx));
    let helper = Arc::new(FakeHelper::new(devices.clone()));
    let (manager, notifications) = VolumeManager::new(
        ManagerConfig::default(),
        devices.clone() as Arc<dyn DeviceOps>,
        helper.clone() as Arc<dyn MappingOps>,
        events_rx,
    );
    Harness {
        manager: Arc::new(manager),
        devices,
        helper,
        notifications,
    }
}

pub fn drain_warnings(notifications: &mut UnboundedReceiver<ManagerEvent>) -> Vec<Warning> {
    let mut warnings = Vec::new();
    while let Ok(event) = notifications.try_recv() {
        if let ManagerEvent::Warning(warning) = event {
            warnings.push(warning);
        }
    }
    warnings
}
