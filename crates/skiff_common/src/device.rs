//! Device identity token.
//!
//! A skiff install proves update eligibility with a stable token: eight
//! random bytes rendered as uppercase hex, generated once and persisted in
//! the daemon configuration. There is no reset surface; a new token means a
//! new install.

use rand::RngCore;
use std::fmt;

/// Stable per-install identity used to gate self-updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken(String);

impl DeviceToken {
    /// Raw entropy length before hex rendering.
    pub const BYTE_LEN: usize = 8;

    /// Generate a fresh token from the thread RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::BYTE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    /// Wrap a token value already persisted in configuration.
    pub fn from_persisted(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
