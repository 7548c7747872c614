//! Core types and configuration for the footprint engine.
//!
//! This crate provides shared types used across all other crates:
//! - Canonical trade events and footprint candles
//! - Hour partition keys and object paths
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod partition;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use partition::PartitionKey;
pub use types::*;
