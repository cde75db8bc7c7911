//! Error types for skiff.

use thiserror::Error;

/// Failure taxonomy shared by the daemon and the CLI.
///
/// Every variant maps to a stable numeric code so callers can branch
/// without parsing message text.
#[derive(Error, Debug)]
pub enum SkiffError {
    #[error("authorization denied: device token {0} is not in the allow-list")]
    AuthorizationDenied(String),

    #[error("no drive session credential is stored")]
    MissingCredential,

    #[error("no usable HTTP target could be derived")]
    InvalidTarget,

    #[error("update script carries no version marker")]
    ScriptInvalid,

    #[error("network error: {0}")]
    Network(String),

    #[error("already at the latest version ({0})")]
    VersionNotNewer(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkiffError {
    pub fn code(&self) -> i32 {
        match self {
            SkiffError::AuthorizationDenied(_) => 1001,
            SkiffError::MissingCredential => 1002,
            SkiffError::InvalidTarget => 1003,
            SkiffError::ScriptInvalid => 1004,
            SkiffError::Network(_) => 1005,
            SkiffError::VersionNotNewer(_) => 1006,
            SkiffError::Config(_) => 1007,
            SkiffError::Store(_) => 1008,
            SkiffError::Io(_) => 1009,
            SkiffError::Json(_) => 1010,
        }
    }
}
