//! Skiff daemon library - exposes modules for testing.

pub mod delivery;
pub mod dispatch;
pub mod organize;
pub mod routes;
pub mod server;
pub mod store;
pub mod update;
