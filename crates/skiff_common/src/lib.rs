//! Skiff Common - shared types for the skiff daemon and control CLI.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod version;

pub use api::*;
pub use config::{SkiffConfig, config_path, data_dir};
pub use device::DeviceToken;
pub use error::SkiffError;
pub use version::{compare_versions, extract_script_version, is_newer_version};
