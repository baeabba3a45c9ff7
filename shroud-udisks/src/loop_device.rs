// SPDX-License-Identifier: GPL-3.0-only

//! Loop device operations: setup by file descriptor, delete, autoclear.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use zbus::zvariant::{DynamicType, OwnedFd as ZOwnedFd, OwnedObjectPath, Type, Value};
use zbus::{Connection, Proxy};

use crate::dbus::decode_c_string_bytes;

const UDISKS_SERVICE: &str = "org.freedesktop.UDisks2";
const UDISKS_MANAGER_PATH: &str = "/org/freedesktop/UDisks2/Manager";
const UDISKS_MANAGER_IFACE: &str = "org.freedesktop.UDisks2.Manager";
const UDISKS_LOOP_IFACE: &str = "org.freedesktop.UDisks2.Loop";

fn call_failure(
    interface: &str,
    method: &str,
    path: &OwnedObjectPath,
    err: zbus::Error,
) -> anyhow::Error {
    if let zbus::Error::MethodError(name, msg, _info) = &err {
        let msg = msg.as_deref().unwrap_or("");
        return anyhow::anyhow!(
            "UDisks2 {interface}.{method} failed for {path}: {}{}{}",
            name.as_str(),
            if msg.is_empty() { "" } else { ": " },
            msg
        );
    }
    err.into()
}

/// Call a raw UDisks2 method with typed arguments and response, keeping
/// the failing interface/method/device visible in the error.
pub(crate) async fn call_udisks_raw<R, B>(
    connection: &Connection,
    path: &OwnedObjectPath,
    interface: &str,
    method: &str,
    args: &B,
) -> Result<R>
where
    R: DeserializeOwned + Type,
    B: Serialize + DynamicType,
{
    let proxy = Proxy::new(connection, UDISKS_SERVICE, path, interface).await?;
    match proxy.call_method(method, args).await {
        Ok(reply) => Ok(reply.body().deserialize()?),
        Err(err) => Err(call_failure(interface, method, path, err)),
    }
}

/// Raw call variant for methods that return nothing.
pub(crate) async fn call_udisks_void<B>(
    connection: &Connection,
    path: &OwnedObjectPath,
    interface: &str,
    method: &str,
    args: &B,
) -> Result<()>
where
    B: Serialize + DynamicType,
{
    let proxy = Proxy::new(connection, UDISKS_SERVICE, path, interface).await?;
    match proxy.call_method(method, args).await {
        Ok(_) => Ok(()),
        Err(err) => Err(call_failure(interface, method, path, err)),
    }
}

/// Result of exposing a backing file as a loop device.
#[derive(Debug)]
pub struct LoopSetup {
    pub object_path: OwnedObjectPath,
    /// OS error message recorded when the file could not be opened
    /// read-write and was opened read-only instead.
    pub read_only_fallback: Option<String>,
}

/// Open a backing file for loop setup, preferring write access.
///
/// Opening can block on slow or remote filesystems, so it is offloaded.
async fn open_backing_file(path: PathBuf) -> Result<(OwnedFd, Option<String>)> {
    tokio::task::spawn_blocking(move || -> Result<(OwnedFd, Option<String>)> {
        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("failed to stat backing file {}", path.display()))?;
        if !metadata.file_type().is_file() {
            anyhow::bail!("backing path {} is not a regular file", path.display());
        }

        match std::fs::OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Ok((file.into(), None)),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                let file = std::fs::OpenOptions::new()
                    .read(true)
                    .open(&path)
                    .with_context(|| {
                        format!("failed to open backing file {} read-only", path.display())
                    })?;
                Ok((file.into(), Some(err.to_string())))
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to open backing file {}", path.display()))
            }
        }
    })
    .await
    .context("backing file open task panicked or was cancelled")?
}

/// Expose a backing file as a loop device.
///
/// UDisks2 expects a Unix FD handle for LoopSetup: (h a{sv}); passing a
/// path string fails with InvalidArgs. The loop device registers
/// asynchronously relative to this call, so the returned object path may
/// not be resolvable until the event stream delivers its addition.
pub async fn loop_setup(connection: &Connection, backing_file: &str) -> Result<LoopSetup> {
    let manager_path: OwnedObjectPath = UDISKS_MANAGER_PATH.try_into()?;

    let (fd, read_only_fallback) = open_backing_file(backing_file.into()).await?;
    let fd: ZOwnedFd = fd.into();

    let mut options: HashMap<&str, Value<'_>> = HashMap::new();
    if read_only_fallback.is_some() {
        options.insert("read-only", Value::from(true));
    }

    let object_path: OwnedObjectPath = call_udisks_raw(
        connection,
        &manager_path,
        UDISKS_MANAGER_IFACE,
        "LoopSetup",
        &(fd, options),
    )
    .await?;
    tracing::debug!(backing = backing_file, object = %object_path, "created loop device");

    Ok(LoopSetup {
        object_path,
        read_only_fallback,
    })
}

/// Delete a loop device by its UDisks2 object path.
pub async fn loop_delete(connection: &Connection, loop_object_path: &str) -> Result<()> {
    let path: OwnedObjectPath = loop_object_path
        .try_into()
        .context("invalid loop object path")?;
    let options: HashMap<&str, Value<'_>> = HashMap::new();
    call_udisks_void(connection, &path, UDISKS_LOOP_IFACE, "Delete", &options).await
}

/// Toggle autoclear so the loop device goes away once its last user
/// (such as a mapping over it) releases it.
pub async fn set_loop_autoclear(
    connection: &Connection,
    loop_object_path: &str,
    value: bool,
) -> Result<()> {
    let path: OwnedObjectPath = loop_object_path
        .try_into()
        .context("invalid loop object path")?;
    let options: HashMap<&str, Value<'_>> = HashMap::new();
    call_udisks_void(
        connection,
        &path,
        UDISKS_LOOP_IFACE,
        "SetAutoclear",
        &(value, options),
    )
    .await
}

/// Backing file of a loop object, or `None` when the object carries no
/// loop interface (it is not a loop device).
pub async fn loop_backing_file(connection: &Connection, object_path: &str) -> Option<String> {
    let proxy = Proxy::new(connection, UDISKS_SERVICE, object_path, UDISKS_LOOP_IFACE)
        .await
        .ok()?;
    let raw: Vec<u8> = proxy.get_property("BackingFile").await.ok()?;
    let decoded = decode_c_string_bytes(&raw);
    if decoded.is_empty() { None } else { Some(decoded) }
}
