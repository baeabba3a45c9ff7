// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;

use zbus::proxy;
use zbus::zvariant::{OwnedObjectPath, Value};

/// Minimal proxy for the UDisks2 Manager, covering the calls the typed
/// `udisks2` surface does not wrap for us.
#[proxy(
    interface = "org.freedesktop.UDisks2.Manager",
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2/Manager"
)]
pub trait UDisks2Manager {
    /// Object paths of all block devices currently exported.
    fn get_block_devices(
        &self,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<Vec<OwnedObjectPath>>;
}
