// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use crate::HelperError;

/// Privileged mapping operations, consumed over RPC.
///
/// Every operation is idempotent from the caller's perspective and
/// reports "did not succeed" as `Ok(false)`, never as an error; `Err` is
/// reserved for transport failures reaching the helper.
#[async_trait]
pub trait MappingOps: Send + Sync {
    /// Create a new mapping with fresh content over `source_device`.
    async fn create(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> Result<bool, HelperError>;

    /// Try to map existing content; fall back to a full create when the
    /// bare mapping fails. The fallback also fires on a wrong passphrase,
    /// which then surfaces as a freshly created volume rather than an
    /// authentication error.
    async fn mount_or_create(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> Result<bool, HelperError>;

    /// Tear down a mapping by name.
    async fn remove(&self, name: &str) -> Result<bool, HelperError>;

    /// Map existing content only, with no create fallback.
    async fn mount(
        &self,
        name: &str,
        passphrase: &str,
        source_device: &str,
    ) -> Result<bool, HelperError>;

    /// Initialize an ext4 filesystem on an existing mapping.
    async fn mkfs_ext4(&self, name: &str) -> Result<bool, HelperError>;
}
