//! Skiff control CLI library - exposes the daemon client for testing.

pub mod client;
