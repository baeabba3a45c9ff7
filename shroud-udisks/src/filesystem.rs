// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem mount/unmount operations with UDisks error classification.

use std::collections::HashMap;

use udisks2::filesystem::FilesystemProxy;
use zbus::Connection;
use zbus::zvariant::{OwnedObjectPath, Value};

use crate::dbus as bs;
use crate::error::{DiskError, classify_zbus_error};

fn object_path(raw: &str) -> Result<OwnedObjectPath, DiskError> {
    raw.try_into()
        .map_err(|_| DiskError::InvalidPath(raw.to_string()))
}

async fn filesystem_proxy(
    connection: &Connection,
    path: OwnedObjectPath,
) -> Result<FilesystemProxy<'_>, DiskError> {
    FilesystemProxy::builder(connection)
        .path(path)?
        .build()
        .await
        .map_err(|e| DiskError::DBusError(e.to_string()))
}

/// Mount the filesystem on a block object; returns the mount point.
pub async fn mount_filesystem(
    connection: &Connection,
    block_object_path: &str,
) -> Result<String, DiskError> {
    let proxy = filesystem_proxy(connection, object_path(block_object_path)?).await?;

    let opts: HashMap<&str, Value<'_>> = HashMap::new();
    let mount_point = proxy
        .mount(opts)
        .await
        .map_err(|e| classify_zbus_error(block_object_path, e))?;
    tracing::info!(object = block_object_path, mount_point, "mounted filesystem");
    Ok(mount_point)
}

/// Unmount one mount of the filesystem on a block object.
///
/// Busy and already-unmounted conditions surface as their classified
/// variants so the lifecycle can react to them specifically.
pub async fn unmount_filesystem(
    connection: &Connection,
    block_object_path: &str,
) -> Result<(), DiskError> {
    let proxy = filesystem_proxy(connection, object_path(block_object_path)?).await?;

    let opts: HashMap<&str, Value<'_>> = HashMap::new();
    proxy
        .unmount(opts)
        .await
        .map_err(|e| classify_zbus_error(block_object_path, e))?;
    tracing::info!(object = block_object_path, "unmounted filesystem");
    Ok(())
}

/// Current mount points of a block object; a missing Filesystem
/// interface reads as none.
pub async fn mount_points(
    connection: &Connection,
    block_object_path: &str,
) -> Result<Vec<String>, DiskError> {
    match filesystem_proxy(connection, object_path(block_object_path)?).await {
        Ok(proxy) => match proxy.mount_points().await {
            Ok(mps) => Ok(bs::decode_mount_points(mps)),
            Err(_) => Ok(Vec::new()),
        },
        Err(_) => Ok(Vec::new()),
    }
}

/// Whether UDisks2 detected a filesystem on the block object. A fresh
/// mapping has none until it is initialized.
pub async fn has_filesystem(
    connection: &Connection,
    block_object_path: &str,
) -> Result<bool, DiskError> {
    match filesystem_proxy(connection, object_path(block_object_path)?).await {
        Ok(proxy) => Ok(proxy.mount_points().await.is_ok()),
        Err(_) => Ok(false),
    }
}
