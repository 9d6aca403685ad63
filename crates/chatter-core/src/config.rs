//! Scheduler and segmenter configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

/// Cadence and parallelism for one scheduler loop.
#[derive(Debug, Clone)]
pub struct StageLoopConfig {
    /// Pause between scheduling rounds.
    pub interval: Duration,
    /// Maximum units in flight within a round.
    pub max_concurrency: usize,
}

impl StageLoopConfig {
    pub fn new(interval: Duration, max_concurrency: usize) -> Self {
        Self {
            interval,
            max_concurrency,
        }
    }
}

/// Word-window parameters for categorization.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Words per categorization prompt.
    pub window_size: usize,
    /// Words shared between consecutive windows.
    pub overlap: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            overlap: 10,
        }
    }
}

/// Configuration for the scheduler and its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub convert: StageLoopConfig,
    pub transcribe: StageLoopConfig,
    pub categorize: StageLoopConfig,
    pub segmenter: SegmenterConfig,
    /// Directory converted WAV files are written to.
    pub wav_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            convert: StageLoopConfig::new(Duration::from_secs(5), 10),
            transcribe: StageLoopConfig::new(Duration::from_secs(5), 10),
            categorize: StageLoopConfig::new(Duration::from_secs(10), 5),
            segmenter: SegmenterConfig::default(),
            wav_dir: PathBuf::from("converted_wav"),
        }
    }
}

impl PipelineConfig {
    /// Reject values that would stall or livelock the scheduler.
    pub fn validate(&self) -> Result<()> {
        for (stage, cfg) in [
            ("convert", &self.convert),
            ("transcribe", &self.transcribe),
            ("categorize", &self.categorize),
        ] {
            if cfg.interval.is_zero() {
                bail!("{stage}: interval must be non-zero");
            }
            if cfg.max_concurrency == 0 {
                bail!("{stage}: max_concurrency must be at least 1");
            }
        }
        if self.segmenter.window_size == 0 {
            bail!("segmenter: window_size must be at least 1");
        }
        // An overlap as large as the window would re-issue the same window
        // forever.
        if self.segmenter.overlap >= self.segmenter.window_size {
            bail!("segmenter: overlap must be smaller than window_size");
        }
        Ok(())
    }
}
