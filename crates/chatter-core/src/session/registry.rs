//! Single authoritative store for session state.
//!
//! One registry is constructed per process and handed by clone to the
//! ingest path and each scheduler loop; every mutation funnels through the
//! methods here. The write lock is held across flag transitions and the
//! insert+completeness read of an ingest, never across a collaborator call,
//! so a slow external stage function cannot stall readers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::pipeline::{StageKind, StageUnit};

use super::{CategorySegment, ChunkKind, Session, SessionSnapshot, SessionSummary, StageStatus};

/// Errors returned by [`SessionRegistry::ingest_chunk`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("session id must not be empty")]
    EmptySessionId,
}

/// Completeness information returned to the ingest caller.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub session_id: String,
    pub chunk_index: u32,
    pub final_received: bool,
    pub complete: bool,
    pub missing_chunks: Vec<u32>,
}

/// A session whose transcript is ready for (re-)categorization.
#[derive(Debug, Clone)]
pub struct CategorizeCandidate {
    pub session_id: String,
    pub transcript: String,
    pub word_count: usize,
}

/// Shared handle to all known sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an uploaded chunk, creating the session on first sight.
    ///
    /// Duplicate indices overwrite silently (last write wins). Returns the
    /// session's completeness state as of this insert; the lock spans both
    /// so a concurrent ingest cannot produce a receipt with stale gaps.
    pub async fn ingest_chunk(
        &self,
        session_id: &str,
        index: u32,
        source_path: PathBuf,
        file_name: String,
        kind: ChunkKind,
    ) -> Result<IngestReceipt, IngestError> {
        if session_id.is_empty() {
            return Err(IngestError::EmptySessionId);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.add_chunk(index, source_path, file_name, kind);

        let receipt = IngestReceipt {
            session_id: session_id.to_string(),
            chunk_index: index,
            final_received: session.final_received,
            complete: session.is_complete(),
            missing_chunks: session.missing_chunks(),
        };

        if receipt.complete {
            tracing::info!(session = %session_id, chunks = session.chunks.len(), "Session complete");
        } else {
            tracing::debug!(session = %session_id, chunk = index, kind = ?kind, "Chunk ingested");
        }

        Ok(receipt)
    }

    /// Read-only snapshot of one session.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(Session::snapshot)
    }

    /// Aggregate counts and results for every known session.
    pub async fn list_summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .values()
            .map(Session::summary)
            .collect()
    }

    /// Collect this round's work for a chunk stage: at most one unit per
    /// session, always the lowest-indexed pending eligible chunk.
    ///
    /// Each stage has a single loop driving it and that loop dispatches a
    /// collected unit exactly once, so a unit cannot be picked twice within
    /// a round.
    pub async fn stage_units(&self, stage: StageKind) -> Vec<StageUnit> {
        let sessions = self.sessions.read().await;
        let mut units = Vec::new();
        for session in sessions.values() {
            let Some(index) = session.next_pending(stage) else {
                continue;
            };
            let chunk = &session.chunks[&index];
            let input = match stage {
                StageKind::Convert => chunk.source_path.clone(),
                StageKind::Transcribe => match &chunk.wav_path {
                    Some(path) => path.clone(),
                    None => {
                        // Convert reported done without recording a path;
                        // skip rather than feed the raw upload to the STT.
                        tracing::warn!(session = %session.id, chunk = index, "Missing WAV path for transcribe unit");
                        continue;
                    }
                },
            };
            units.push(StageUnit {
                session_id: session.id.clone(),
                chunk_index: index,
                stage,
                input,
            });
        }
        units
    }

    /// Sessions with enough transcribed words for at least one window.
    ///
    /// A session is skipped while its word count is below `min_words`
    /// (insufficient data, not an error) and when the count has not moved
    /// since the last categorization pass; recomputing an unchanged
    /// transcript cannot change the result.
    pub async fn categorize_candidates(&self, min_words: usize) -> Vec<CategorizeCandidate> {
        let sessions = self.sessions.read().await;
        let mut candidates = Vec::new();
        for session in sessions.values() {
            let transcript = session.transcript_text();
            let word_count = transcript.split_whitespace().count();
            if word_count < min_words || word_count == session.categorized_words {
                continue;
            }
            candidates.push(CategorizeCandidate {
                session_id: session.id.clone(),
                transcript,
                word_count,
            });
        }
        candidates
    }

    pub async fn mark_convert_done(&self, session_id: &str, index: u32, wav_path: PathBuf) {
        self.with_chunk(session_id, index, |chunk| {
            chunk.wav_path = Some(wav_path);
            chunk.convert = StageStatus::Done;
        })
        .await;
    }

    pub async fn mark_convert_failed(&self, session_id: &str, index: u32, error: String) {
        self.with_chunk(session_id, index, |chunk| {
            chunk.convert = StageStatus::Failed { error };
        })
        .await;
    }

    pub async fn mark_transcribe_done(&self, session_id: &str, index: u32, transcript: String) {
        self.with_chunk(session_id, index, |chunk| {
            chunk.transcript = Some(transcript);
            chunk.transcribe = StageStatus::Done;
        })
        .await;
    }

    pub async fn mark_transcribe_failed(&self, session_id: &str, index: u32, error: String) {
        self.with_chunk(session_id, index, |chunk| {
            chunk.transcribe = StageStatus::Failed { error };
        })
        .await;
    }

    /// Replace a session's categorization output wholesale.
    ///
    /// `word_count` is the transcript size this pass consumed; it feeds the
    /// unchanged-transcript skip in [`Self::categorize_candidates`].
    pub async fn store_category_results(
        &self,
        session_id: &str,
        word_count: usize,
        results: Vec<CategorySegment>,
    ) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.category_results = results;
            session.categorized_words = word_count;
        }
    }

    async fn with_chunk(&self, session_id: &str, index: u32, apply: impl FnOnce(&mut super::Chunk)) {
        let mut sessions = self.sessions.write().await;
        match sessions
            .get_mut(session_id)
            .and_then(|s| s.chunks.get_mut(&index))
        {
            Some(chunk) => apply(chunk),
            None => {
                tracing::warn!(session = %session_id, chunk = index, "Completion for unknown chunk");
            }
        }
    }
}
