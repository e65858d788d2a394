// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted preferences of the streaming demo service.

use serde::{Deserialize, Serialize};

/// Config key under which [`ServicePrefs`] are stored.
pub const SERVICE_PREFS_KEY: &str = "ripple_service";

/// Saved settings for `ripple-service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePrefs {
    /// Socket address the HTTP listener binds.
    pub listen: String,
    /// Put the full error chain into error frames instead of a generic message.
    pub verbose_diagnostics: bool,
    /// How long the demo engine waits before its delayed update (ms).
    pub update_delay_ms: u64,
}

impl Default for ServicePrefs {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".into(),
            verbose_diagnostics: false,
            update_delay_ms: 1500,
        }
    }
}
