// SPDX-License-Identifier: GPL-3.0-only

mod device;
mod mapping;

pub use device::{DeviceOps, LoopSetupOutcome};
pub use mapping::MappingOps;
