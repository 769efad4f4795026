//! Core logic for serveo tunnel container lifecycle management
//!
//! This crate provides:
//! - Project records and the file-backed project store
//! - Tunnel image builds from the bundled recipe
//! - Reconciliation of the per-project tunnel container
//! - Log relaying from the tunnel container
//! - The `TunnelManager` facade and host lifecycle hooks

mod error;
mod image;
mod logs;
mod manager;
mod project;
mod tunnel;

pub use error::*;
pub use image::*;
pub use logs::*;
pub use manager::*;
pub use project::*;
pub use tunnel::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
