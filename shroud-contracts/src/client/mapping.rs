// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use zbus::proxy;

use crate::client::connection::shared_connection;
use crate::{HelperError, MappingOps};

/// D-Bus proxy for the privileged mapping helper.
///
/// Every method returns a bare success flag; the helper never raises for
/// an operation that merely did not succeed.
#[proxy(
    interface = "org.shroud.MappingHelper1",
    default_service = "org.shroud.MappingHelper1",
    default_path = "/org/shroud/MappingHelper1"
)]
pub trait MappingHelper {
    /// Create a new mapping and fresh content over the source device.
    async fn create(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> zbus::Result<bool>;

    /// Map existing content, falling back to a full create on failure.
    async fn mount_or_create(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> zbus::Result<bool>;

    /// Tear down the named mapping.
    async fn remove(&self, name: &str) -> zbus::Result<bool>;

    /// Map existing content only.
    async fn mount(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> zbus::Result<bool>;

    /// Initialize an ext4 filesystem on the named mapping.
    async fn mkfs_ext4(&self, name: &str) -> zbus::Result<bool>;
}

/// Client for the privileged mapping helper.
pub struct MappingClient {
    proxy: MappingHelperProxy<'static>,
}

impl MappingClient {
    /// Connect to the helper under its well-known bus name.
    pub async fn new() -> Result<Self, HelperError> {
        let conn = shared_connection().await?;
        let proxy = MappingHelperProxy::new(conn)
            .await
            .map_err(|e| HelperError::Connection(format!("failed to create helper proxy: {e}")))?;
        Ok(Self { proxy })
    }

    /// Connect to the helper under an overridden bus name, for test buses.
    pub async fn with_bus_name(bus_name: &str) -> Result<Self, HelperError> {
        let conn = shared_connection().await?;
        let proxy = MappingHelperProxy::builder(conn)
            .destination(bus_name.to_string())
            .map_err(|e| HelperError::Connection(format!("invalid helper bus name: {e}")))?
            .build()
            .await
            .map_err(|e| HelperError::Connection(format!("failed to create helper proxy: {e}")))?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl MappingOps for MappingClient {
    async fn create(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> Result<bool, HelperError> {
        Ok(self.proxy.create(name, passphrase, source_device).await?)
    }

    async fn mount_or_create(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> Result<bool, HelperError> {
        Ok(self
            .proxy
            .mount_or_create(name, passphrase, source_device)
            .await?)
    }

    async fn remove(&self, name: &str) -> Result<bool, HelperError> {
        Ok(self.proxy.remove(name).await?)
    }

    async fn mount(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> Result<bool, HelperError> {
        Ok(self.proxy.mount(name, passphrase, source_device).await?)
    }

    async fn mkfs_ext4(&self, name: &str) -> Result<bool, HelperError> {
        Ok(self.proxy.mkfs_ext4(name).await?)
    }
}
