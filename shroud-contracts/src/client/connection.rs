// SPDX-License-Identifier: GPL-3.0-only

//! Cached system-bus connection shared by every client in the process.

use std::sync::OnceLock;

use zbus::Connection;

use crate::HelperError;

static SYSTEM_CONNECTION: OnceLock<Connection> = OnceLock::new();

/// Get or lazily establish the shared system bus connection.
///
/// Concurrent first calls may each open a connection; the `OnceLock`
/// retains exactly one and the losers are dropped.
pub async fn shared_connection() -> Result<&'static Connection, HelperError> {
    if let Some(conn) = SYSTEM_CONNECTION.get() {
        return Ok(conn);
    }

    let conn = Connection::system()
        .await
        .map_err(|e| HelperError::Connection(format!("failed to connect to system bus: {e}")))?;
    let _ = SYSTEM_CONNECTION.set(conn);

    SYSTEM_CONNECTION
        .get()
        .ok_or_else(|| HelperError::Connection("system bus connection was not retained".into()))
}
