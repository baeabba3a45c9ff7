// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Non-fatal condition surfaced to the caller as a title/body pair, e.g.
/// a container that had to be opened read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub title: String,
    pub body: String,
}

impl Warning {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}
