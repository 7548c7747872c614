//! Trade ingestion for the footprint engine.
//!
//! This crate handles:
//! - Wire record normalization into canonical trade events
//! - Redelivery filtering by content hash
//! - Trade side inference (per-bucket tick rule)
//! - Per-minute footprint candle building

pub mod canonicalizer;
pub mod classifier;
pub mod dedup;
pub mod footprint;

pub use canonicalizer::{Canonicalizer, Rejection};
pub use classifier::{ClassificationStats, TickRule};
pub use dedup::Deduplicator;
pub use footprint::FootprintAggregator;
