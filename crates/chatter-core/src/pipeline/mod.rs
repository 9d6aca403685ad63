//! Background pipeline scheduler.
//!
//! # Architecture
//!
//! Three independent periodic loops drive every session's chunks through
//! the pipeline:
//!
//! ```text
//!  ingest ──► SessionRegistry ◄──────────── mark done/failed
//!                   │                              ▲
//!                   │ scan pending                 │
//!                   ▼                              │
//!  convert loop ────► StageWorkerPool ──► MediaConverter
//!  transcribe loop ─► StageWorkerPool ──► Transcriber
//!  categorize loop ─► StageWorkerPool ──► Segmenter ──► Categorizer
//! ```
//!
//! Each loop collects at most one pending unit per eligible session, fans
//! the round out through its bounded pool, and only sleeps once the round
//! barrier clears. Stopping is cooperative: the cancellation token is
//! observed between rounds, so an in-flight round always completes.

mod pool;
mod types;

pub use pool::StageWorkerPool;
pub use types::{StageKind, StageUnit};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{PipelineConfig, SegmenterConfig, StageLoopConfig};
use crate::providers::{Categorizer, MediaConverter, Transcriber};
use crate::segment;
use crate::session::SessionRegistry;

/// Handle to the three running scheduler loops.
pub struct PipelineScheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineScheduler {
    /// Spawn the convert, transcribe and categorize loops.
    ///
    /// `config` should have passed [`PipelineConfig::validate`]; the
    /// registry and collaborators are shared by handle with the caller.
    pub fn start(
        registry: SessionRegistry,
        converter: Arc<dyn MediaConverter>,
        transcriber: Arc<dyn Transcriber>,
        categorizer: Arc<dyn Categorizer>,
        config: PipelineConfig,
    ) -> Self {
        let cancel = CancellationToken::new();

        let convert_handle = spawn_stage_loop("convert", config.convert.clone(), cancel.clone(), {
            let registry = registry.clone();
            let pool = StageWorkerPool::new("convert", config.convert.max_concurrency);
            move || run_convert_round(registry.clone(), converter.clone(), pool.clone())
        });

        let transcribe_handle =
            spawn_stage_loop("transcribe", config.transcribe.clone(), cancel.clone(), {
                let registry = registry.clone();
                let pool = StageWorkerPool::new("transcribe", config.transcribe.max_concurrency);
                move || run_transcribe_round(registry.clone(), transcriber.clone(), pool.clone())
            });

        let categorize_handle =
            spawn_stage_loop("categorize", config.categorize.clone(), cancel.clone(), {
                let pool = StageWorkerPool::new("categorize", config.categorize.max_concurrency);
                let segmenter = config.segmenter.clone();
                move || {
                    run_categorize_round(
                        registry.clone(),
                        categorizer.clone(),
                        pool.clone(),
                        segmenter.clone(),
                    )
                }
            });

        tracing::info!(
            convert_interval = ?config.convert.interval,
            transcribe_interval = ?config.transcribe.interval,
            categorize_interval = ?config.categorize.interval,
            "Pipeline scheduler started"
        );

        Self {
            cancel,
            handles: vec![convert_handle, transcribe_handle, categorize_handle],
        }
    }

    /// Request shutdown and wait for all loops to exit.
    ///
    /// Loops observe the signal between rounds, so whatever round is in
    /// flight finishes first; the joins complete in any order.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler loop panicked");
            }
        }
        tracing::info!("Pipeline scheduler stopped");
    }
}

impl Drop for PipelineScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_stage_loop<F, Fut>(
    label: &'static str,
    config: StageLoopConfig,
    cancel: CancellationToken,
    round: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(stage = label, "Scheduler loop started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                _ = ticker.tick() => {
                    round().await;
                }
            }
        }

        tracing::debug!(stage = label, "Scheduler loop stopped");
    })
}

async fn run_convert_round(
    registry: SessionRegistry,
    converter: Arc<dyn MediaConverter>,
    pool: StageWorkerPool,
) {
    let units = registry.stage_units(StageKind::Convert).await;
    if units.is_empty() {
        return;
    }
    tracing::debug!(units = units.len(), "Convert round");

    pool.run_round(units, |unit| {
        let registry = registry.clone();
        let converter = converter.clone();
        async move {
            match converter.convert(&unit.input).await {
                Ok(wav_path) => {
                    tracing::info!(
                        session = %unit.session_id,
                        chunk = unit.chunk_index,
                        wav = %wav_path.display(),
                        "Converted chunk"
                    );
                    registry
                        .mark_convert_done(&unit.session_id, unit.chunk_index, wav_path)
                        .await;
                }
                Err(e) => {
                    tracing::error!(
                        session = %unit.session_id,
                        chunk = unit.chunk_index,
                        error = %e,
                        "Conversion failed"
                    );
                    registry
                        .mark_convert_failed(&unit.session_id, unit.chunk_index, e.to_string())
                        .await;
                }
            }
        }
    })
    .await;
}

async fn run_transcribe_round(
    registry: SessionRegistry,
    transcriber: Arc<dyn Transcriber>,
    pool: StageWorkerPool,
) {
    let units = registry.stage_units(StageKind::Transcribe).await;
    if units.is_empty() {
        return;
    }
    tracing::debug!(units = units.len(), "Transcribe round");

    pool.run_round(units, |unit| {
        let registry = registry.clone();
        let transcriber = transcriber.clone();
        async move {
            match transcriber.transcribe(&unit.input).await {
                Ok(Some(transcript)) => {
                    tracing::info!(
                        session = %unit.session_id,
                        chunk = unit.chunk_index,
                        words = transcript.split_whitespace().count(),
                        "Transcribed chunk"
                    );
                    registry
                        .mark_transcribe_done(&unit.session_id, unit.chunk_index, transcript)
                        .await;
                }
                Ok(None) => {
                    tracing::error!(
                        session = %unit.session_id,
                        chunk = unit.chunk_index,
                        "Transcription returned no result after retries"
                    );
                    registry
                        .mark_transcribe_failed(
                            &unit.session_id,
                            unit.chunk_index,
                            "no result after retries".to_string(),
                        )
                        .await;
                }
                Err(e) => {
                    tracing::error!(
                        session = %unit.session_id,
                        chunk = unit.chunk_index,
                        error = %e,
                        "Transcription failed"
                    );
                    registry
                        .mark_transcribe_failed(&unit.session_id, unit.chunk_index, e.to_string())
                        .await;
                }
            }
        }
    })
    .await;
}

async fn run_categorize_round(
    registry: SessionRegistry,
    categorizer: Arc<dyn Categorizer>,
    pool: StageWorkerPool,
    segmenter: SegmenterConfig,
) {
    let candidates = registry
        .categorize_candidates(segmenter.window_size)
        .await;
    if candidates.is_empty() {
        return;
    }
    tracing::debug!(sessions = candidates.len(), "Categorize round");

    pool.run_round(candidates, |candidate| {
        let registry = registry.clone();
        let categorizer = categorizer.clone();
        let segmenter = segmenter.clone();
        async move {
            let results =
                segment::categorize_transcript(categorizer.as_ref(), &candidate.transcript, &segmenter)
                    .await;
            tracing::info!(
                session = %candidate.session_id,
                segments = results.len(),
                words = candidate.word_count,
                "Categorized session"
            );
            registry
                .store_category_results(&candidate.session_id, candidate.word_count, results)
                .await;
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use crate::session::ChunkKind;

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.convert = StageLoopConfig::new(Duration::from_millis(10), 10);
        config.transcribe = StageLoopConfig::new(Duration::from_millis(10), 10);
        config.categorize = StageLoopConfig::new(Duration::from_millis(10), 5);
        config
    }

    struct StubConverter {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl StubConverter {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay,
            })
        }
    }

    #[async_trait]
    impl MediaConverter for StubConverter {
        async fn convert(&self, source: &Path) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                bail!("synthetic conversion failure");
            }
            Ok(source.with_extension("wav"))
        }
    }

    struct StubTranscriber {
        text: String,
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, _wav: &Path) -> Result<Option<String>> {
            Ok(Some(self.text.clone()))
        }
    }

    struct StubCategorizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Categorizer for StubCategorizer {
        async fn categorize(&self, _prompt: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("music".to_string()))
        }
    }

    async fn ingest_session(registry: &SessionRegistry, session: &str, chunks: u32) {
        for index in 0..chunks {
            let kind = match index {
                0 => ChunkKind::First,
                i if i == chunks - 1 => ChunkKind::Final,
                _ => ChunkKind::Middle,
            };
            registry
                .ingest_chunk(
                    session,
                    index,
                    PathBuf::from(format!("uploads/{session}_{index}.webm")),
                    format!("{session}_{index}.webm"),
                    kind,
                )
                .await
                .unwrap();
        }
    }

    async fn wait_until<F, Fut>(mut done: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pipeline did not reach the expected state in time");
    }

    #[tokio::test]
    async fn drives_concurrent_sessions_to_quiescence() {
        let registry = SessionRegistry::new();

        // Concurrent ingest across many sessions.
        let sessions: Vec<String> = (0..20).map(|s| format!("s{s}")).collect();
        futures::future::join_all(
            sessions
                .iter()
                .map(|session| ingest_session(&registry, session, 5)),
        )
        .await;

        // Five words per chunk: 25 words per session, enough for one window.
        let scheduler = PipelineScheduler::start(
            registry.clone(),
            StubConverter::ok(),
            Arc::new(StubTranscriber {
                text: "alpha beta gamma delta epsilon".to_string(),
            }),
            Arc::new(StubCategorizer {
                calls: AtomicUsize::new(0),
            }),
            test_config(),
        );

        wait_until(|| {
            let registry = registry.clone();
            async move {
                let summaries = registry.list_summaries().await;
                summaries.len() == 20
                    && summaries.iter().all(|s| {
                        s.converted_count == 5
                            && s.transcribed_count == 5
                            && !s.category_results.is_empty()
                    })
            }
        })
        .await;

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn failed_conversion_is_terminal_and_blocks_transcription() {
        let registry = SessionRegistry::new();
        ingest_session(&registry, "s1", 1).await;

        let converter = StubConverter::failing();
        let scheduler = PipelineScheduler::start(
            registry.clone(),
            converter.clone(),
            Arc::new(StubTranscriber {
                text: "unused".to_string(),
            }),
            Arc::new(StubCategorizer {
                calls: AtomicUsize::new(0),
            }),
            test_config(),
        );

        wait_until(|| {
            let registry = registry.clone();
            async move {
                registry
                    .get_session("s1")
                    .await
                    .is_some_and(|s| s.chunks[0].convert.is_failed())
            }
        })
        .await;

        // Let several more rounds elapse: the failed chunk must not be
        // retried and must never reach the transcriber.
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
        let snapshot = registry.get_session("s1").await.unwrap();
        assert!(snapshot.chunks[0].convert.is_failed());
        assert!(snapshot.chunks[0].transcribe.is_pending());
        assert!(snapshot.chunks[0].transcript.is_none());
    }

    #[tokio::test]
    async fn categorization_runs_once_per_transcript_state() {
        let registry = SessionRegistry::new();
        ingest_session(&registry, "s1", 1).await;

        // 22 words with window 20 / overlap 10: exactly one segment.
        let words: Vec<String> = (0..22).map(|i| format!("w{i}")).collect();
        let categorizer = Arc::new(StubCategorizer {
            calls: AtomicUsize::new(0),
        });

        let scheduler = PipelineScheduler::start(
            registry.clone(),
            StubConverter::ok(),
            Arc::new(StubTranscriber {
                text: words.join(" "),
            }),
            categorizer.clone(),
            test_config(),
        );

        wait_until(|| {
            let registry = registry.clone();
            async move {
                registry
                    .get_session("s1")
                    .await
                    .is_some_and(|s| !s.category_results.is_empty())
            }
        })
        .await;

        // More rounds with an unchanged transcript must not re-categorize.
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        let snapshot = registry.get_session("s1").await.unwrap();
        assert_eq!(snapshot.category_results.len(), 1);
        assert_eq!(
            snapshot.category_results[0].result.as_deref(),
            Some("music")
        );
        assert_eq!(categorizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_the_in_flight_round() {
        let registry = SessionRegistry::new();
        ingest_session(&registry, "s1", 1).await;

        let converter = StubConverter::slow(Duration::from_millis(80));
        let scheduler = PipelineScheduler::start(
            registry.clone(),
            converter.clone(),
            Arc::new(StubTranscriber {
                text: "unused".to_string(),
            }),
            Arc::new(StubCategorizer {
                calls: AtomicUsize::new(0),
            }),
            test_config(),
        );

        // First tick fires immediately; give the round time to start, then
        // stop while the conversion is still sleeping.
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop().await;

        let snapshot = registry.get_session("s1").await.unwrap();
        assert!(snapshot.chunks[0].convert.is_done());
    }
}
