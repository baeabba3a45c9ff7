// SPDX-License-Identifier: GPL-3.0-only

//! Mapped-device naming convention.
//!
//! The privileged helper creates every mapping as `shroud_<suffix>`, so
//! the unlocked counterpart of a volume is always reachable at
//! `/dev/mapper/shroud_<suffix>` without scanning the mapper table.

/// Prefix the helper prepends to every mapping name it creates.
pub const MAPPED_NAME_PREFIX: &str = "shroud_";

/// Directory where device-mapper nodes surface.
pub const MAPPER_DIR: &str = "/dev/mapper";

/// Full mapping name for a caller-supplied suffix.
pub fn mapped_name(suffix: &str) -> String {
    format!("{MAPPED_NAME_PREFIX}{suffix}")
}

/// Device path of the unlocked counterpart for a caller-supplied suffix.
pub fn mapped_device_path(suffix: &str) -> String {
    format!("{MAPPER_DIR}/{MAPPED_NAME_PREFIX}{suffix}")
}

/// Whether a device path names a device-mapper node rather than a real
/// block device.
pub fn is_mapped_device_path(path: &str) -> bool {
    path.starts_with("/dev/dm-") || path.starts_with("/dev/mapper/")
}

/// Extract the caller-supplied suffix from a mapped device path, if the
/// path follows this manager's naming convention.
pub fn suffix_from_mapped_path(path: &str) -> Option<&str> {
    path.strip_prefix(MAPPER_DIR)?
        .strip_prefix('/')?
        .strip_prefix(MAPPED_NAME_PREFIX)
        .filter(|suffix| !suffix.is_empty())
}
