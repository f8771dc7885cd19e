//! Core types for Gridlink: the brightness grid, the wire protocol, config, and errors.

pub mod config;
pub mod error;
pub mod grid;
pub mod protocol;

pub use error::{GridlinkError, Result};
pub use grid::{GridBuffer, MAX_LEVEL};
pub use protocol::Command;
