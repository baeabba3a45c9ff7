// SPDX-License-Identifier: GPL-3.0-only

//! Production `DeviceOps` adapter over the UDisks2 layer.

use async_trait::async_trait;
use zbus::Connection;

use shroud_contracts::{DeviceError, DeviceOps, LoopSetupOutcome};
use shroud_types::Volume;
use shroud_udisks::DiskError;

pub struct UdisksBackend {
    connection: Connection,
}

impl UdisksBackend {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

fn convert(err: DiskError) -> DeviceError {
    match err {
        DiskError::DeviceNotFound(device) => DeviceError::NotFound(device),
        DiskError::ResourceBusy(device) => DeviceError::Busy(device),
        DiskError::NotMounted(device) => DeviceError::NotMounted(device),
        DiskError::PermissionDenied(detail) => DeviceError::PermissionDenied(detail),
        other => DeviceError::Failure(other.to_string()),
    }
}

fn convert_anyhow(err: anyhow::Error) -> DeviceError {
    DeviceError::Failure(format!("{err:#}"))
}

#[async_trait]
impl DeviceOps for UdisksBackend {
    async fn enumerate(&self) -> Result<Vec<String>, DeviceError> {
        shroud_udisks::enumerate_device_paths(&self.connection)
            .await
            .map_err(convert)
    }

    async fn resolve(&self, device_path: &str) -> Result<Volume, DeviceError> {
        shroud_udisks::resolve_volume(&self.connection, device_path)
            .await
            .map_err(convert)
    }

    async fn loop_setup(&self, backing_file: &str) -> Result<LoopSetupOutcome, DeviceError> {
        let setup = shroud_udisks::loop_setup(&self.connection, backing_file)
            .await
            .map_err(convert_anyhow)?;
        Ok(LoopSetupOutcome {
            object_path: setup.object_path.to_string(),
            read_only_fallback: setup.read_only_fallback,
        })
    }

    async fn loop_delete(&self, loop_object_path: &str) -> Result<(), DeviceError> {
        shroud_udisks::loop_delete(&self.connection, loop_object_path)
            .await
            .map_err(convert_anyhow)
    }

    async fn set_loop_autoclear(
        &self,
        loop_object_path: &str,
        value: bool,
    ) -> Result<(), DeviceError> {
        shroud_udisks::set_loop_autoclear(&self.connection, loop_object_path, value)
            .await
            .map_err(convert_anyhow)
    }

    async fn mount(&self, object_path: &str) -> Result<String, DeviceError> {
        shroud_udisks::mount_filesystem(&self.connection, object_path)
            .await
            .map_err(convert)
    }

    async fn unmount(&self, object_path: &str) -> Result<(), DeviceError> {
        shroud_udisks::unmount_filesystem(&self.connection, object_path)
            .await
            .map_err(convert)
    }

    async fn mount_points(&self, object_path: &str) -> Result<Vec<String>, DeviceError> {
        shroud_udisks::mount_points(&self.connection, object_path)
            .await
            .map_err(convert)
    }

    async fn has_filesystem(&self, object_path: &str) -> Result<bool, DeviceError> {
        shroud_udisks::has_filesystem(&self.connection, object_path)
            .await
            .map_err(convert)
    }
}
