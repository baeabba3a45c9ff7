// SPDX-License-Identifier: GPL-3.0-only

mod connection;
mod mapping;

pub use connection::shared_connection;
pub use mapping::{MappingClient, MappingHelperProxy};
