//! Common utilities and types shared across OpenVault crates.
//!
//! This crate provides the error taxonomy surfaced to callers and the
//! identifier types used by the hierarchy index and the command surface.

pub mod error;
pub mod types;

pub use error::{Error, ErrorCode, Result};
pub use types::{ItemType, NodeId, VaultPath};
