mod config;
mod naming;
mod volume;
mod warning;

pub use config::ManagerConfig;
pub use naming::{
    MAPPED_NAME_PREFIX, MAPPER_DIR, is_mapped_device_path, mapped_device_path, mapped_name,
    suffix_from_mapped_path,
};
pub use volume::{MountState, Volume, VolumeClass, classify};
pub use warning::Warning;
