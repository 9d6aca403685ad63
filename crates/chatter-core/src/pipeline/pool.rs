//! Bounded fan-out/fan-in executor for one scheduling round.

use std::future::Future;

use tokio::task::{JoinError, JoinSet};

/// Runs a round of stage work with a fixed concurrency ceiling.
///
/// Each unit's future is spawned onto a [`JoinSet`], keeping at most
/// `max_concurrency` in flight; the remainder queue until a slot frees up.
/// [`run_round`](Self::run_round) returns only once every unit has finished
/// (the round barrier). A unit that panics is reaped and logged without
/// aborting its siblings; expected failures are folded into the unit's own
/// status by the round body and never escape the pool.
#[derive(Debug, Clone)]
pub struct StageWorkerPool {
    label: &'static str,
    max_concurrency: usize,
}

impl StageWorkerPool {
    pub fn new(label: &'static str, max_concurrency: usize) -> Self {
        Self {
            label,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Execute `op` for every unit, bounded to `max_concurrency` at a time,
    /// and wait for the whole round to finish.
    pub async fn run_round<T, F, Fut>(&self, units: Vec<T>, op: F)
    where
        T: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if units.is_empty() {
            return;
        }
        let total = units.len();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        for unit in units {
            while in_flight.len() >= self.max_concurrency {
                if let Some(result) = in_flight.join_next().await {
                    self.reap(result);
                }
            }
            in_flight.spawn(op(unit));
        }

        while let Some(result) = in_flight.join_next().await {
            self.reap(result);
        }

        tracing::debug!(stage = self.label, units = total, "Round complete");
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            tracing::error!(stage = self.label, error = %e, "Stage task panicked");
        }
    }
}
