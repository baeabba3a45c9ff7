// SPDX-License-Identifier: GPL-3.0-only

//! Merged block-device event stream.
//!
//! UDisks2 reports device arrivals and departures through the
//! ObjectManager and state changes through per-object PropertiesChanged
//! signals. Both are merged here into one channel by a single forwarding
//! task, so for any one device the events arrive downstream in exactly
//! the order the bus delivered them. The subscription lives as long as
//! the connection; it is not restartable.

use std::collections::HashMap;

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::{Connection, MatchRule, MessageStream, Proxy};

use crate::dbus::device_path_from_object_path;
use crate::error::DiskError;

const UDISKS_SERVICE: &str = "org.freedesktop.UDisks2";
const UDISKS_ROOT_PATH: &str = "/org/freedesktop/UDisks2";
const BLOCK_DEVICES_NAMESPACE: &str = "/org/freedesktop/UDisks2/block_devices";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Added,
    Removed,
    Changed,
}

/// One notification about a block device, carrying both the UDisks2
/// object path and the derived `/dev` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub object_path: String,
    pub device_path: String,
}

enum Incoming {
    Added(zbus::Message),
    Removed(zbus::Message),
    Changed(zbus::Message),
}

/// Subscribe to the merged device event stream.
pub async fn subscribe_device_events(
    connection: &Connection,
) -> Result<UnboundedReceiver<DeviceEvent>, DiskError> {
    let obj_manager = Proxy::new(
        connection,
        UDISKS_SERVICE,
        UDISKS_ROOT_PATH,
        "org.freedesktop.DBus.ObjectManager",
    )
    .await
    .map_err(|e| DiskError::ConnectionFailed(e.to_string()))?;

    let added = obj_manager
        .receive_signal("InterfacesAdded")
        .await
        .map_err(|e| DiskError::ConnectionFailed(e.to_string()))?;
    let removed = obj_manager
        .receive_signal("InterfacesRemoved")
        .await
        .map_err(|e| DiskError::ConnectionFailed(e.to_string()))?;

    let changed_rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface("org.freedesktop.DBus.Properties")
        .map_err(|e| DiskError::DBusError(e.to_string()))?
        .member("PropertiesChanged")
        .map_err(|e| DiskError::DBusError(e.to_string()))?
        .path_namespace(BLOCK_DEVICES_NAMESPACE)
        .map_err(|e| DiskError::DBusError(e.to_string()))?
        .build();
    let changed = MessageStream::for_match_rule(changed_rule, connection, Some(64))
        .await
        .map_err(|e| DiskError::ConnectionFailed(e.to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();

    let added = added.map(Incoming::Added);
    let removed = removed.map(Incoming::Removed);
    let changed = changed
        .filter_map(|result| futures_util::future::ready(result.ok()))
        .map(Incoming::Changed);
    let mut merged = stream::select(added, stream::select(removed, changed));

    tokio::spawn(async move {
        while let Some(incoming) = merged.next().await {
            if let Some(event) = decode(incoming) {
                tracing::debug!(kind = ?event.kind, device = %event.device_path, "device event");
                if tx.send(event).is_err() {
                    break;
                }
            }
        }
        tracing::debug!("device event stream ended");
    });

    Ok(rx)
}

/// Decode a bus message into a device event, dropping everything outside
/// the block_devices namespace.
fn decode(incoming: Incoming) -> Option<DeviceEvent> {
    match incoming {
        Incoming::Added(msg) => {
            let (object_path, _interfaces): (
                OwnedObjectPath,
                HashMap<String, HashMap<String, OwnedValue>>,
            ) = msg.body().deserialize().ok()?;
            event_for(DeviceEventKind::Added, object_path.as_str())
        }
        Incoming::Removed(msg) => {
            let (object_path, _interfaces): (OwnedObjectPath, Vec<String>) =
                msg.body().deserialize().ok()?;
            event_for(DeviceEventKind::Removed, object_path.as_str())
        }
        Incoming::Changed(msg) => {
            let object_path = msg.header().path()?.to_string();
            let (interface, _changed, _invalidated): (
                String,
                HashMap<String, OwnedValue>,
                Vec<String>,
            ) = msg.body().deserialize().ok()?;
            if !interface.starts_with(UDISKS_SERVICE) {
                return None;
            }
            event_for(DeviceEventKind::Changed, &object_path)
        }
    }
}

fn event_for(kind: DeviceEventKind, object_path: &str) -> Option<DeviceEvent> {
    let device_path = device_path_from_object_path(object_path)?;
    Some(DeviceEvent {
        kind,
        object_path: object_path.to_string(),
        device_path,
    })
}
