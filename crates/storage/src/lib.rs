//! Durable storage for the footprint engine.
//!
//! This crate handles:
//! - The object store seam (in-memory and local filesystem backends)
//! - Hour partition line format, merge, and inspection
//! - Per-key serialized merge-on-write and staged promotion
//! - Raw trade archive buffering
//! - Dirty partition tracking

pub mod codec;
pub mod dirty;
pub mod raw_log;
pub mod store;
pub mod writer;

pub use codec::PartitionReport;
pub use dirty::DirtySet;
pub use raw_log::{RawFlushReport, RawLogBuffer};
pub use store::{FsStore, MemoryStore, ObjectStore};
pub use writer::{PartitionWriter, StageMode};
