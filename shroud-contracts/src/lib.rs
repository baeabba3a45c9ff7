pub mod client;
pub mod error;
pub mod traits;

pub use client::{MappingClient, shared_connection};
pub use error::{DeviceError, HelperError};
pub use traits::{DeviceOps, LoopSetupOutcome, MappingOps};
