//! Configuration for serveo
//!
//! This crate handles the global configuration file
//! (`~/.config/serveo/config.toml`): container runtime sockets and the
//! settings of the tunnel container.

mod error;
mod global;

pub use error::*;
pub use global::*;
