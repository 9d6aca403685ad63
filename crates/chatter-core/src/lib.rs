//! Chatter Core - chunked-conversation ingest and categorization pipeline
//!
//! This crate contains the session state machine and background pipeline
//! for Chatter, including:
//! - Chunk ingest, completeness and missing-chunk tracking (SessionRegistry)
//! - Three-stage background scheduler (convert → transcribe → categorize)
//! - Bounded-concurrency worker pools with per-round barriers
//! - Overlapping word-window segmentation for categorization prompts
//! - Collaborator seams with ffmpeg and Workers AI backends
//!
//! The transport layer that feeds [`SessionRegistry::ingest_chunk`] and
//! serves the snapshots lives outside this crate.

pub mod config;
pub mod pipeline;
pub mod providers;
pub mod segment;
pub mod session;

pub use config::{PipelineConfig, SegmenterConfig, StageLoopConfig};
pub use pipeline::{PipelineScheduler, StageKind, StageUnit, StageWorkerPool};
pub use providers::{
    Categorizer, FfmpegConverter, MediaConverter, Transcriber, WorkersAiClient, WorkersAiConfig,
};
pub use session::{
    ChunkKind, IngestError, IngestReceipt, SessionRegistry, SessionSnapshot, SessionSummary,
    StageStatus,
};
