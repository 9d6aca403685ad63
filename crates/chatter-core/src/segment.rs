//! Overlapping word-window segmentation for categorization.
//!
//! Categorization prompts are fixed-size windows over the whitespace
//! tokenization of a session's assembled transcript. Overlap gives each
//! window local context from its predecessor while keeping the per-call
//! payload bounded.

use crate::config::SegmenterConfig;
use crate::providers::Categorizer;
use crate::session::CategorySegment;

/// Build the window prompts over `text`.
///
/// The first window covers words `[0, window_size)`; each subsequent window
/// starts `overlap` words before the previous end. A trailing remainder
/// shorter than `window_size` produces no window, and fewer than
/// `window_size` words in total produce none at all.
pub fn window_prompts(text: &str, window_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if window_size == 0 || words.len() < window_size {
        return Vec::new();
    }

    let mut prompts = vec![words[..window_size].join(" ")];
    let mut last_end = window_size;
    while last_end < words.len() {
        let start = last_end.saturating_sub(overlap);
        let end = start + window_size;
        if end > words.len() || end <= last_end {
            break;
        }
        prompts.push(words[start..end].join(" "));
        last_end = end;
    }
    prompts
}

/// Categorize every window of `transcript`, preserving window order.
///
/// A window the categorizer gives up on (or errors out of) is kept with a
/// `None` result so the output still covers the whole transcript.
pub async fn categorize_transcript(
    categorizer: &dyn Categorizer,
    transcript: &str,
    config: &SegmenterConfig,
) -> Vec<CategorySegment> {
    let mut segments = Vec::new();
    for prompt in window_prompts(transcript, config.window_size, config.overlap) {
        let result = match categorizer.categorize(&prompt).await {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                tracing::warn!(prompt = %prompt, "Categorizer exhausted retries on window");
                None
            }
            Err(e) => {
                tracing::error!(prompt = %prompt, error = %e, "Categorization failed");
                None
            }
        };
        segments.push(CategorySegment { prompt, result });
    }
    segments
}
