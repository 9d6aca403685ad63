//! Collaborator seams for the pipeline stages.
//!
//! The scheduler depends only on these traits; the concrete backends
//! (ffmpeg subprocess, Workers AI over HTTP) live behind them and can be
//! swapped for mocks in tests. Implementations must be safe to call
//! concurrently for distinct inputs, because the worker pools will.

mod ffmpeg;
mod workers_ai;

pub use ffmpeg::FfmpegConverter;
pub use workers_ai::{WorkersAiClient, WorkersAiConfig};

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

/// Normalizes an uploaded audio file to WAV.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    /// Convert `source` and return the path of the produced WAV file.
    /// Fails on unreadable or unsupported input.
    async fn convert(&self, source: &Path) -> Result<PathBuf>;
}

/// Speech-to-text over a converted WAV file.
///
/// The backend owns its retry budget; `Ok(None)` means the budget is
/// exhausted and the caller should treat the unit as permanently failed.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &Path) -> Result<Option<String>>;
}

/// Text categorization over one prompt window. Same retry-then-`None`
/// contract as [`Transcriber`].
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, prompt: &str) -> Result<Option<String>>;
}
