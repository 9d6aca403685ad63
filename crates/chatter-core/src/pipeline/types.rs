//! Pipeline stage and work-unit definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Chunk-scoped processing stage in the pipeline.
///
/// Categorization is session-scoped and tracked separately; only the stages
/// with per-chunk status flags appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Convert,
    Transcribe,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Convert => write!(f, "convert"),
            StageKind::Transcribe => write!(f, "transcribe"),
        }
    }
}

/// One unit of pending stage work.
///
/// Units are recomputed by scanning the registry every scheduling round and
/// never persisted. `input` is the file the stage function operates on: the
/// uploaded source for convert, the produced WAV for transcribe.
#[derive(Debug, Clone)]
pub struct StageUnit {
    pub session_id: String,
    pub chunk_index: u32,
    pub stage: StageKind,
    pub input: PathBuf,
}
