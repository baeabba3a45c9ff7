// SPDX-License-Identifier: GPL-3.0-only

//! Decoding helpers for UDisks2 wire representations: NUL-terminated
//! byte strings and the `_xx` hex escaping of block object path names.

const BLOCK_DEVICES_PREFIX: &str = "/org/freedesktop/UDisks2/block_devices/";

pub fn decode_c_string_bytes(bytes: &[u8]) -> String {
    let raw = bytes.split(|b| *b == 0).next().unwrap_or(bytes);
    String::from_utf8_lossy(raw).to_string()
}

pub fn decode_mount_points(mount_points: Vec<Vec<u8>>) -> Vec<String> {
    mount_points
        .into_iter()
        .filter_map(|mp| {
            let decoded = decode_c_string_bytes(&mp);
            if decoded.is_empty() { None } else { Some(decoded) }
        })
        .collect()
}

/// Derive `/dev/<name>` from a UDisks2 block object path, undoing the
/// `_xx` escaping UDisks applies to bytes outside `[A-Za-z0-9]` (so
/// `.../dm_2d3` names `/dev/dm-3`). Returns `None` for objects outside
/// the block_devices namespace.
pub fn device_path_from_object_path(object_path: &str) -> Option<String> {
    let name = object_path.strip_prefix(BLOCK_DEVICES_PREFIX)?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(format!("/dev/{}", unescape_object_name(name)))
}

fn unescape_object_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' && i + 2 < bytes.len() {
            if let Some(byte) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_c_string_bytes_truncates_at_nul() {
        assert_eq!(
            decode_c_string_bytes(b"/dev/loop5\0garbage"),
            "/dev/loop5"
        );
        assert_eq!(decode_c_string_bytes(b"/dev/sda1"), "/dev/sda1");
    }

    #[test]
    fn decode_mount_points_filters_empty_entries() {
        let decoded = decode_mount_points(vec![
            b"/run/media/user/DISK\0".to_vec(),
            b"\0".to_vec(),
            Vec::new(),
        ]);
        assert_eq!(decoded, vec!["/run/media/user/DISK".to_string()]);
    }

    #[test]
    fn plain_object_names_map_to_dev_paths() {
        assert_eq!(
            device_path_from_object_path("/org/freedesktop/UDisks2/block_devices/loop5").as_deref(),
            Some("/dev/loop5")
        );
    }

    #[test]
    fn escaped_object_names_are_unescaped() {
        assert_eq!(
            device_path_from_object_path("/org/freedesktop/UDisks2/block_devices/dm_2d3").as_deref(),
            Some("/dev/dm-3")
        );
    }

    #[test]
    fn non_block_objects_are_rejected() {
        assert_eq!(
            device_path_from_object_path("/org/freedesktop/UDisks2/drives/Virtual_Disk"),
            None
        );
    }
}
