mod dbus;
mod manager_proxy;

pub mod error;
pub mod filesystem;
pub mod loop_device;
pub mod monitor;
pub mod resolve;

pub use dbus::{decode_c_string_bytes, decode_mount_points, device_path_from_object_path};
pub use error::DiskError;
pub use filesystem::{has_filesystem, mount_filesystem, mount_points, unmount_filesystem};
pub use loop_device::{LoopSetup, loop_backing_file, loop_delete, loop_setup, set_loop_autoclear};
pub use manager_proxy::UDisks2ManagerProxy;
pub use monitor::{DeviceEvent, DeviceEventKind, subscribe_device_events};
pub use resolve::{enumerate_device_paths, resolve_volume};
