//! Single-writer trade ingestion and footprint aggregation engine.
//!
//! This crate ties the pipeline together:
//! - Live and warmup ingest into in-memory minute candles
//! - Periodic merge-on-write of dirty hour partitions
//! - Staged warmup writes with explicit promotion
//! - Minute finalization notifications
//! - An actor task and handle serializing all requests

pub mod backfill;
pub mod control;
pub mod engine;
pub mod notifier;
pub mod scheduler;

pub use backfill::{WarmupFinalizeSummary, WarmupFlushSummary};
pub use control::{spawn, Command, EngineHandle};
pub use engine::{EngineMode, EngineStatus, FootprintEngine, IngestSummary};
pub use notifier::{ChannelSink, FinalizationNotifier, NotificationSink, TracingSink};
pub use scheduler::WakeSummary;
