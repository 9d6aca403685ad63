//! Session and chunk state.
//!
//! A session is one conversation: an ordered map of uploaded audio chunks,
//! each carrying its own status flags for the convert and transcribe stages,
//! plus the categorization output derived from the assembled transcript.
//! Chunk indices are assigned by the uploader; once a chunk tagged `final`
//! has arrived the index set is expected to be contiguous from zero, and any
//! gap is reported as a missing chunk.

mod registry;

pub use registry::{CategorizeCandidate, IngestError, IngestReceipt, SessionRegistry};

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::StageKind;

/// Positional role of an uploaded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    First,
    Middle,
    Final,
}

/// Status of a chunk within one pipeline stage.
///
/// `Failed` is terminal: the scheduler never re-selects a failed chunk, but
/// the status (and the error that caused it) stays visible in snapshots so a
/// caller can decide to re-ingest the audio under a new index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageStatus {
    Pending,
    Done,
    Failed { error: String },
}

impl StageStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, StageStatus::Pending)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageStatus::Failed { .. })
    }
}

/// One uploaded audio chunk and its progress through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Where the transport layer stored the uploaded bytes.
    pub source_path: PathBuf,
    /// Original upload file name (for logs and snapshots).
    pub file_name: String,
    pub kind: ChunkKind,
    pub convert: StageStatus,
    /// Set when convert completes.
    pub wav_path: Option<PathBuf>,
    pub transcribe: StageStatus,
    /// Set only when transcribe completes.
    pub transcript: Option<String>,
}

impl Chunk {
    fn new(source_path: PathBuf, file_name: String, kind: ChunkKind) -> Self {
        Self {
            source_path,
            file_name,
            kind,
            convert: StageStatus::Pending,
            wav_path: None,
            transcribe: StageStatus::Pending,
            transcript: None,
        }
    }

    pub fn status(&self, stage: StageKind) -> &StageStatus {
        match stage {
            StageKind::Convert => &self.convert,
            StageKind::Transcribe => &self.transcribe,
        }
    }
}

/// A categorization prompt window and the model's answer for it.
///
/// `result` is `None` when the categorizer gave up on the window. Segments
/// are immutable once produced; re-categorization replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySegment {
    pub prompt: String,
    pub result: Option<String>,
}

/// One conversation: uploaded chunks plus derived pipeline state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Chunks keyed by upload index. A `BTreeMap` keeps scans in index
    /// order, which is what makes lowest-index selection deterministic.
    pub chunks: BTreeMap<u32, Chunk>,
    pub final_received: bool,
    pub category_results: Vec<CategorySegment>,
    /// Word count the last categorization pass consumed. Lets the scheduler
    /// skip sessions whose transcript has not grown since.
    pub categorized_words: usize,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chunks: BTreeMap::new(),
            final_received: false,
            category_results: Vec::new(),
            categorized_words: 0,
            created_at: Utc::now(),
        }
    }

    /// Insert or overwrite the chunk at `index`.
    ///
    /// Duplicate indices are tolerated (at-least-once delivery): the new
    /// payload replaces the old record entirely, resetting its stage flags.
    /// `final_received` is sticky once set.
    pub fn add_chunk(
        &mut self,
        index: u32,
        source_path: PathBuf,
        file_name: String,
        kind: ChunkKind,
    ) {
        self.chunks
            .insert(index, Chunk::new(source_path, file_name, kind));
        if kind == ChunkKind::Final {
            self.final_received = true;
        }
    }

    /// True once the final chunk has arrived and the index set is
    /// `{0..max}` with no gaps.
    pub fn is_complete(&self) -> bool {
        if !self.final_received {
            return false;
        }
        match self.chunks.keys().next_back() {
            Some(&max) => self.chunks.len() as u64 == u64::from(max) + 1,
            None => false,
        }
    }

    /// Sorted list of gaps in the index set, empty until the final chunk
    /// has arrived.
    pub fn missing_chunks(&self) -> Vec<u32> {
        if !self.final_received {
            return Vec::new();
        }
        let Some(&max) = self.chunks.keys().next_back() else {
            return Vec::new();
        };
        (0..=max).filter(|i| !self.chunks.contains_key(i)).collect()
    }

    /// True if any chunk is still pending for `stage`, eligibility aside.
    pub fn has_pending(&self, stage: StageKind) -> bool {
        self.chunks.values().any(|c| c.status(stage).is_pending())
    }

    /// Lowest-indexed chunk that is pending *and eligible* for `stage`.
    ///
    /// Transcription is gated on the chunk's conversion having completed;
    /// a chunk whose convert is pending or failed is skipped over.
    pub fn next_pending(&self, stage: StageKind) -> Option<u32> {
        self.chunks
            .iter()
            .find(|(_, chunk)| {
                chunk.status(stage).is_pending()
                    && match stage {
                        StageKind::Convert => true,
                        StageKind::Transcribe => chunk.convert.is_done(),
                    }
            })
            .map(|(&index, _)| index)
    }

    /// Transcripts of all transcribed chunks, joined in index order.
    pub fn transcript_text(&self) -> String {
        let parts: Vec<&str> = self
            .chunks
            .values()
            .filter(|c| c.transcribe.is_done())
            .filter_map(|c| c.transcript.as_deref())
            .collect();
        parts.join(" ")
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            created_at: self.created_at,
            final_received: self.final_received,
            complete: self.is_complete(),
            missing_chunks: self.missing_chunks(),
            chunks: self
                .chunks
                .iter()
                .map(|(&index, chunk)| ChunkSnapshot {
                    index,
                    file_name: chunk.file_name.clone(),
                    kind: chunk.kind,
                    convert: chunk.convert.clone(),
                    transcribe: chunk.transcribe.clone(),
                    transcript: chunk.transcript.clone(),
                })
                .collect(),
            category_results: self.category_results.clone(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            chunk_count: self.chunks.len(),
            converted_count: self.chunks.values().filter(|c| c.convert.is_done()).count(),
            transcribed_count: self
                .chunks
                .values()
                .filter(|c| c.transcribe.is_done())
                .count(),
            failed_count: self
                .chunks
                .values()
                .filter(|c| c.convert.is_failed() || c.transcribe.is_failed())
                .count(),
            transcripts: self.chunks.values().map(|c| c.transcript.clone()).collect(),
            category_results: self.category_results.clone(),
        }
    }
}

/// Read-only view of one chunk for the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSnapshot {
    pub index: u32,
    pub file_name: String,
    pub kind: ChunkKind,
    pub convert: StageStatus,
    pub transcribe: StageStatus,
    pub transcript: Option<String>,
}

/// Read-only view of one session for the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub final_received: bool,
    pub complete: bool,
    pub missing_chunks: Vec<u32>,
    pub chunks: Vec<ChunkSnapshot>,
    pub category_results: Vec<CategorySegment>,
}

/// Aggregate counts for one session, for the status-all listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub chunk_count: usize,
    pub converted_count: usize,
    pub transcribed_count: usize,
    /// Chunks that failed in either stage.
    pub failed_count: usize,
    /// Per-chunk transcripts in index order (`None` until transcribed).
    pub transcripts: Vec<Option<String>>,
    pub category_results: Vec<CategorySegment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_args(n: u32) -> (PathBuf, String) {
        (
            PathBuf::from(format!("uploads/chunk{n}.webm")),
            format!("chunk{n}.webm"),
        )
    }

    fn session_with(indices: &[u32], final_at: Option<u32>) -> Session {
        let mut session = Session::new("s1");
        for &i in indices {
            let (path, name) = chunk_args(i);
            let kind = if Some(i) == final_at {
                ChunkKind::Final
            } else if i == 0 {
                ChunkKind::First
            } else {
                ChunkKind::Middle
            };
            session.add_chunk(i, path, name, kind);
        }
        session
    }

    #[test]
    fn incomplete_without_final_chunk() {
        let session = session_with(&[0, 1, 2], None);
        assert!(!session.is_complete());
        assert!(session.missing_chunks().is_empty());
    }

    #[test]
    fn complete_when_contiguous_through_final() {
        let session = session_with(&[0, 1, 2], Some(2));
        assert!(session.is_complete());
        assert!(session.missing_chunks().is_empty());
    }

    #[test]
    fn missing_chunks_are_the_sorted_gap_set() {
        let session = session_with(&[0, 2, 5], Some(5));
        assert!(!session.is_complete());
        assert_eq!(session.missing_chunks(), vec![1, 3, 4]);
    }

    #[test]
    fn duplicate_ingest_overwrites_without_error() {
        let mut session = session_with(&[0, 1], Some(1));
        session.chunks.get_mut(&1).unwrap().convert = StageStatus::Done;

        let (path, _) = chunk_args(1);
        session.add_chunk(1, path, "retry.webm".into(), ChunkKind::Middle);

        let replaced = &session.chunks[&1];
        assert_eq!(replaced.file_name, "retry.webm");
        // The replacement payload has not been converted yet.
        assert!(replaced.convert.is_pending());
        // final_received is sticky even though the overwrite was not final.
        assert!(session.final_received);
        assert!(session.is_complete());
    }

    #[test]
    fn next_pending_picks_lowest_index() {
        let mut session = session_with(&[0, 1, 2], Some(2));
        session.chunks.get_mut(&0).unwrap().convert = StageStatus::Done;
        assert_eq!(session.next_pending(StageKind::Convert), Some(1));
    }

    #[test]
    fn failed_chunk_is_never_reselected() {
        let mut session = session_with(&[0, 1], Some(1));
        session.chunks.get_mut(&0).unwrap().convert = StageStatus::Failed {
            error: "bad input".into(),
        };
        assert_eq!(session.next_pending(StageKind::Convert), Some(1));
        session.chunks.get_mut(&1).unwrap().convert = StageStatus::Done;
        assert_eq!(session.next_pending(StageKind::Convert), None);
        assert!(!session.has_pending(StageKind::Convert));
    }

    #[test]
    fn transcribe_requires_convert_done() {
        let mut session = session_with(&[0, 1, 2], Some(2));
        // 0: convert pending, 1: convert failed, 2: convert done.
        session.chunks.get_mut(&1).unwrap().convert = StageStatus::Failed {
            error: "unsupported".into(),
        };
        session.chunks.get_mut(&2).unwrap().convert = StageStatus::Done;
        assert_eq!(session.next_pending(StageKind::Transcribe), Some(2));
    }

    #[test]
    fn transcript_text_joins_done_chunks_in_index_order() {
        let mut session = session_with(&[0, 1, 2], Some(2));
        for (i, text) in [(2u32, "tail"), (0, "head")] {
            let chunk = session.chunks.get_mut(&i).unwrap();
            chunk.convert = StageStatus::Done;
            chunk.transcribe = StageStatus::Done;
            chunk.transcript = Some(text.to_string());
        }
        // Chunk 1 is still pending and contributes nothing.
        assert_eq!(session.transcript_text(), "head tail");
    }

    #[test]
    fn summary_counts_match_status_flags() {
        let mut session = session_with(&[0, 1, 2, 3], Some(3));
        session.chunks.get_mut(&0).unwrap().convert = StageStatus::Done;
        session.chunks.get_mut(&1).unwrap().convert = StageStatus::Done;
        {
            let chunk = session.chunks.get_mut(&0).unwrap();
            chunk.transcribe = StageStatus::Done;
            chunk.transcript = Some("hello".into());
        }
        session.chunks.get_mut(&2).unwrap().convert = StageStatus::Failed {
            error: "boom".into(),
        };

        let summary = session.summary();
        assert_eq!(summary.chunk_count, 4);
        assert_eq!(summary.converted_count, 2);
        assert_eq!(summary.transcribed_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.transcripts[0].as_deref(), Some("hello"));
    }
}
