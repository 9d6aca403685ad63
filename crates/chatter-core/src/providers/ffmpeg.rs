//! ffmpeg-backed audio normalization.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use super::MediaConverter;

/// Converts any container/codec ffmpeg can demux to 16 kHz mono PCM WAV.
///
/// Output files land in `output_dir` under a unique name, so concurrent
/// conversions of distinct chunks never collide.
pub struct FfmpegConverter {
    output_dir: PathBuf,
}

impl FfmpegConverter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Check that an ffmpeg binary is reachable on this host.
    pub async fn check_available() -> Result<()> {
        let status = Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("ffmpeg is not installed or not on PATH")?;
        if !status.success() {
            bail!("ffmpeg -version exited with {status}");
        }
        Ok(())
    }

    fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("chunk");
        self.output_dir
            .join(format!("{stem}_{}.wav", Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl MediaConverter for FfmpegConverter {
    async fn convert(&self, source: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("creating {}", self.output_dir.display()))?;

        let wav_path = self.output_path(source);
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(["-c:a", "pcm_s16le", "-ar", "16000", "-ac", "1", "-f", "wav"])
            .arg(&wav_path)
            .output()
            .await
            .context("failed to spawn ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "ffmpeg exited with {} for {}: {}",
                output.status,
                source.display(),
                stderr.trim()
            );
        }

        tracing::debug!(source = %source.display(), wav = %wav_path.display(), "Converted to WAV");
        Ok(wav_path)
    }
}
