// SPDX-License-Identifier: GPL-3.0-only

//! Resolve device paths to UDisks2 block objects and volume snapshots.
//!
//! Resolution starts from the kernel device number of the device file,
//! so it works for any spelling of a device (`/dev/mapper/*` symlinks
//! included), and queries the bus live so every caller observes current
//! state. A path that cannot be mapped to a device number, or a device
//! number with no block object, resolves to `DeviceNotFound`.

use std::collections::HashMap;

use nix::sys::stat::{SFlag, stat};
use udisks2::block::BlockProxy;
use udisks2::filesystem::FilesystemProxy;
use udisks2::partition::PartitionProxy;
use zbus::Connection;
use zbus::zvariant::OwnedObjectPath;

use shroud_types::{Volume, VolumeClass, classify, is_mapped_device_path};

use crate::dbus as bs;
use crate::error::DiskError;
use crate::loop_device::loop_backing_file;
use crate::manager_proxy::UDisks2ManagerProxy;

fn canonicalize_best_effort(p: &str) -> Option<String> {
    std::fs::canonicalize(p)
        .ok()
        .map(|c| c.to_string_lossy().to_string())
}

fn device_number_for_path(device_path: &str) -> Result<u64, DiskError> {
    let st = stat(device_path).map_err(|_| DiskError::DeviceNotFound(device_path.to_string()))?;
    if st.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFBLK.bits() {
        return Err(DiskError::DeviceNotFound(format!(
            "{device_path} is not a block device"
        )));
    }
    Ok(st.st_rdev)
}

async fn block_device_path(proxy: &BlockProxy<'_>) -> Option<String> {
    let preferred = bs::decode_c_string_bytes(&proxy.preferred_device().await.ok()?);
    let device = if preferred.is_empty() {
        bs::decode_c_string_bytes(&proxy.device().await.ok()?)
    } else {
        preferred
    };
    if device.is_empty() { None } else { Some(device) }
}

/// Resolve a device path to the UDisks2 block object exporting it.
///
/// Matches on the kernel device number first, with a canonicalized
/// device-path comparison as fallback for objects that do not report one.
pub(crate) async fn block_object_path_for_device(
    connection: &Connection,
    device_path: &str,
) -> Result<OwnedObjectPath, DiskError> {
    let devnum = device_number_for_path(device_path)?;

    let manager = UDisks2ManagerProxy::new(connection)
        .await
        .map_err(|e| DiskError::ConnectionFailed(e.to_string()))?;
    let block_paths = manager
        .get_block_devices(HashMap::new())
        .await
        .map_err(|e| DiskError::DBusError(e.to_string()))?;

    let device_canon = canonicalize_best_effort(device_path);

    for obj in &block_paths {
        let proxy = match BlockProxy::builder(connection).path(obj)?.build().await {
            Ok(p) => p,
            Err(_) => continue,
        };

        if let Ok(number) = proxy.device_number().await
            && number == devnum
        {
            return Ok(obj.clone());
        }

        let Some(block_device) = block_device_path(&proxy).await else {
            continue;
        };
        if block_device == device_path {
            return Ok(obj.clone());
        }
        if let (Some(canon), Some(block_canon)) =
            (&device_canon, canonicalize_best_effort(&block_device))
            && block_canon == *canon
        {
            return Ok(obj.clone());
        }
    }

    Err(DiskError::DeviceNotFound(device_path.to_string()))
}

/// Resolve a device path to a fresh volume snapshot.
pub async fn resolve_volume(connection: &Connection, device_path: &str) -> Result<Volume, DiskError> {
    let object_path = block_object_path_for_device(connection, device_path).await?;
    volume_for_object(connection, &object_path).await
}

/// Build the snapshot for a block object: device identity, loop backing
/// (its own or its partition table's), filesystem presence, mount points.
pub(crate) async fn volume_for_object(
    connection: &Connection,
    object_path: &OwnedObjectPath,
) -> Result<Volume, DiskError> {
    let block = BlockProxy::builder(connection)
        .path(object_path)?
        .build()
        .await
        .map_err(|e| DiskError::DBusError(e.to_string()))?;

    let device_path = block_device_path(&block)
        .await
        .ok_or_else(|| DiskError::DeviceNotFound(object_path.to_string()))?;

    let size = block.size().await.unwrap_or(0);
    let read_only = block.read_only().await.unwrap_or(false);
    let label = block.id_label().await.unwrap_or_default();

    let own_backing = loop_backing_file(connection, object_path.as_str()).await;
    let is_loop = own_backing.is_some();

    let mut is_partition = false;
    let mut table_loop_object: Option<String> = None;
    let mut table_backing: Option<String> = None;
    if let Ok(partition) = PartitionProxy::builder(connection)
        .path(object_path)?
        .build()
        .await
        && let Ok(table_path) = partition.table().await
    {
        is_partition = true;
        if let Some(backing) = loop_backing_file(connection, table_path.as_str()).await {
            table_loop_object = Some(table_path.to_string());
            table_backing = Some(backing);
        }
    }

    let (has_filesystem, mount_points) = match FilesystemProxy::builder(connection)
        .path(object_path)?
        .build()
        .await
    {
        Ok(proxy) => match proxy.mount_points().await {
            Ok(mps) => (true, bs::decode_mount_points(mps)),
            Err(_) => (false, Vec::new()),
        },
        Err(_) => (false, Vec::new()),
    };

    let backing_file = own_backing.or_else(|| table_backing.clone());
    let mut class = classify(&device_path, is_loop, table_backing.is_some());
    if class == VolumeClass::FileContainer && backing_file.is_none() {
        // A loop device with no configured backing file has nothing to
        // key a container on; present it as a plain attached device.
        tracing::debug!(device = %device_path, "loop device without backing file");
        class = VolumeClass::AttachedDevice;
    }

    let loop_object_path = if is_loop {
        Some(object_path.to_string())
    } else {
        table_loop_object
    };

    Ok(Volume {
        is_mapped: is_mapped_device_path(&device_path),
        device_path,
        object_path: object_path.to_string(),
        class,
        backing_file,
        is_loop,
        is_partition,
        loop_object_path,
        has_filesystem,
        mount_points,
        size,
        read_only,
        label,
    })
}

/// Device paths of every block device UDisks2 currently exports, for
/// seeding the registry at startup.
pub async fn enumerate_device_paths(connection: &Connection) -> Result<Vec<String>, DiskError> {
    let manager = UDisks2ManagerProxy::new(connection)
        .await
        .map_err(|e| DiskError::ConnectionFailed(e.to_string()))?;
    let block_paths = manager
        .get_block_devices(HashMap::new())
        .await
        .map_err(|e| DiskError::DBusError(e.to_string()))?;

    let mut devices = Vec::with_capacity(block_paths.len());
    for obj in &block_paths {
        let proxy = match BlockProxy::builder(connection).path(obj)?.build().await {
            Ok(p) => p,
            Err(_) => continue,
        };
        if let Some(device) = block_device_path(&proxy).await {
            devices.push(device);
        }
    }
    Ok(devices)
}
