//! Error types for the UDisks2-facing device layer.

use thiserror::Error;

const UDISKS_ERROR_DEVICE_BUSY: &str = "org.freedesktop.UDisks2.Error.DeviceBusy";
const UDISKS_ERROR_NOT_MOUNTED: &str = "org.freedesktop.UDisks2.Error.NotMounted";
const UDISKS_ERROR_NOT_AUTHORIZED: &str = "org.freedesktop.UDisks2.Error.NotAuthorized";
const DBUS_ERROR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device is busy: {0}")]
    ResourceBusy(String),

    #[error("not mounted: {0}")]
    NotMounted(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("D-Bus error: {0}")]
    DBusError(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("D-Bus failure")]
    Zbus(#[from] zbus::Error),
}

impl DiskError {
    /// The failure means the device does not exist (yet, or any more);
    /// reconciliation treats this as absence rather than as an error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_))
    }
}

/// Map a well-known UDisks2/D-Bus error name onto the variant callers
/// special-case; anything unrecognized falls through to the generic
/// conversion so the raw message stays visible.
pub(crate) fn classify_error_name(name: &str, device: &str, detail: &str) -> Option<DiskError> {
    match name {
        UDISKS_ERROR_DEVICE_BUSY => Some(DiskError::ResourceBusy(device.to_string())),
        UDISKS_ERROR_NOT_MOUNTED => Some(DiskError::NotMounted(device.to_string())),
        UDISKS_ERROR_NOT_AUTHORIZED => Some(DiskError::PermissionDenied(format!(
            "{device}: {detail}"
        ))),
        DBUS_ERROR_UNKNOWN_OBJECT => Some(DiskError::DeviceNotFound(device.to_string())),
        _ => None,
    }
}

/// Convert a zbus failure for an operation on `device` into a `DiskError`,
/// classifying the UDisks error names the lifecycle reacts to.
pub(crate) fn classify_zbus_error(device: &str, err: zbus::Error) -> DiskError {
    if let zbus::Error::MethodError(name, detail, _) = &err {
        let detail = detail.as_deref().unwrap_or("");
        if let Some(classified) = classify_error_name(name.as_str(), device, detail) {
            return classified;
        }
    }
    DiskError::OperationFailed(format!("{device}: {err}"))
}
