//! Background loop that drains the cache's pending updates into the durable
//! store.
//!
//! Each cycle pops up to `batch_size` owners, reads their current
//! connections and upserts them. A full batch is followed immediately by the
//! next cycle so bursts drain quickly; an empty queue or a failure pauses the
//! loop. Pauses end early when shutdown is requested.
//!
//! Draining is destructive. If the durable upsert fails after a drain, the
//! live data is still correct in the cache but the signal that it needs
//! persisting is gone; with [`FailurePolicy::Drop`] the durable store stays
//! stale for those owners until they are written again.
//! [`FailurePolicy::Requeue`] pushes them back onto the queue instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::cache::FastStore;
use crate::durable::DurableStore;
use crate::types::WidgetConnections;

/// Default cap on owners drained per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default pause after an empty drain or a failure.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// What to do with a drained batch the durable store refused.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and forget the batch.
    #[default]
    Drop,
    /// Push the batch's owners back onto the tail of the queue.
    Requeue,
}

/// Reconciler tuning.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Maximum owners popped per cycle.
    pub batch_size: usize,
    /// Pause after a cycle that found nothing to do.
    pub idle_pause: Duration,
    /// Pause after a failed cycle.
    pub error_pause: Duration,
    /// Handling of batches that could not be persisted.
    pub failure_policy: FailurePolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_pause: DEFAULT_PAUSE,
            error_pause: DEFAULT_PAUSE,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

impl ReconcilerConfig {
    /// Sets the per-cycle batch cap (at least 1).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the idle pause.
    pub fn idle_pause(mut self, pause: Duration) -> Self {
        self.idle_pause = pause;
        self
    }

    /// Sets the pause after failures.
    pub fn error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    /// Sets the failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Result of one drain-and-persist cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// This many deduplicated records were persisted.
    Persisted(usize),
    /// The queue was empty.
    Idle,
    /// The drain transaction failed and was rolled back; the queue is
    /// unchanged.
    RetrieveFailed,
    /// A drained batch could not be persisted.
    PersistFailed,
}

impl CycleOutcome {
    fn pause(self, config: &ReconcilerConfig) -> Option<Duration> {
        match self {
            CycleOutcome::Persisted(_) => None,
            CycleOutcome::Idle => Some(config.idle_pause),
            CycleOutcome::RetrieveFailed | CycleOutcome::PersistFailed => Some(config.error_pause),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    batches_persisted: AtomicU64,
    records_persisted: AtomicU64,
    retrieve_failures: AtomicU64,
    persist_failures: AtomicU64,
    records_dropped: AtomicU64,
    records_requeued: AtomicU64,
}

/// Point-in-time copy of the reconciler counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ReconcilerStats {
    /// Cycles started.
    pub cycles: u64,
    /// Batches upserted successfully.
    pub batches_persisted: u64,
    /// Records upserted successfully.
    pub records_persisted: u64,
    /// Cycles whose drain failed.
    pub retrieve_failures: u64,
    /// Cycles whose upsert failed.
    pub persist_failures: u64,
    /// Records drained but never persisted.
    pub records_dropped: u64,
    /// Records pushed back onto the queue after a failed upsert.
    pub records_requeued: u64,
}

impl Counters {
    fn snapshot(&self) -> ReconcilerStats {
        ReconcilerStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            batches_persisted: self.batches_persisted.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            retrieve_failures: self.retrieve_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_requeued: self.records_requeued.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

/// Drains [`FastStore`] pending updates into a [`DurableStore`].
pub struct Reconciler {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    config: ReconcilerConfig,
    counters: Counters,
}

impl Reconciler {
    /// Creates a reconciler; nothing runs until [`Reconciler::run_once`] or
    /// [`Reconciler::spawn`].
    pub fn new(
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            fast,
            durable,
            config,
            counters: Counters::default(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Current counters.
    pub fn stats(&self) -> ReconcilerStats {
        self.counters.snapshot()
    }

    /// Runs one drain-and-persist cycle on the calling thread.
    pub fn run_once(&self) -> CycleOutcome {
        bump(&self.counters.cycles, 1);
        let started = Instant::now();

        let batch = match self.fast.retrieve_recent_updates(self.config.batch_size) {
            Ok(batch) => batch,
            Err(err) => {
                bump(&self.counters.retrieve_failures, 1);
                error!(error = %err, "reconciler.retrieve_failed");
                return CycleOutcome::RetrieveFailed;
            }
        };
        if batch.is_empty() {
            trace!("reconciler.idle");
            return CycleOutcome::Idle;
        }

        if let Err(err) = self.durable.update_associations(&batch) {
            bump(&self.counters.persist_failures, 1);
            error!(error = %err, records = batch.len(), "reconciler.persist_failed");
            self.handle_unpersisted(&batch);
            return CycleOutcome::PersistFailed;
        }

        bump(&self.counters.batches_persisted, 1);
        bump(&self.counters.records_persisted, batch.len());
        info!(
            records = batch.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciler.persisted"
        );
        CycleOutcome::Persisted(batch.len())
    }

    /// Runs cycles back to back until one does not persist anything and
    /// returns the number of records persisted.
    pub fn flush(&self) -> usize {
        let mut total = 0;
        while let CycleOutcome::Persisted(n) = self.run_once() {
            total += n;
        }
        debug!(records = total, "reconciler.flush");
        total
    }

    fn handle_unpersisted(&self, batch: &[WidgetConnections]) {
        match self.config.failure_policy {
            FailurePolicy::Drop => {
                bump(&self.counters.records_dropped, batch.len());
                warn!(records = batch.len(), "reconciler.batch_dropped");
            }
            FailurePolicy::Requeue => {
                let serials: Vec<String> =
                    batch.iter().map(|c| c.serial_number.clone()).collect();
                match self.fast.requeue(&serials) {
                    Ok(()) => {
                        bump(&self.counters.records_requeued, serials.len());
                        debug!(records = serials.len(), "reconciler.batch_requeued");
                    }
                    Err(err) => {
                        bump(&self.counters.records_dropped, serials.len());
                        error!(error = %err, records = serials.len(), "reconciler.requeue_failed");
                    }
                }
            }
        }
    }

    /// Loops until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Store calls run on the blocking pool and are not interrupted; the
    /// shutdown signal is honored between cycles and during pauses.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            idle_pause_ms = self.config.idle_pause.as_millis() as u64,
            error_pause_ms = self.config.error_pause.as_millis() as u64,
            failure_policy = ?self.config.failure_policy,
            "reconciler.start"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let this = Arc::clone(&self);
            let pause = match task::spawn_blocking(move || this.run_once()).await {
                Ok(outcome) => outcome.pause(&self.config),
                Err(err) => {
                    error!(error = %err, "reconciler.cycle_aborted");
                    Some(self.config.error_pause)
                }
            };
            let Some(pause) = pause else {
                continue;
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(stats = ?self.stats(), "reconciler.stop");
    }

    /// Starts [`Reconciler::run`] on the current tokio runtime.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown, signal) = watch::channel(false);
        let reconciler = Arc::new(self);
        let task = tokio::spawn(Arc::clone(&reconciler).run(signal));
        ReconcilerHandle {
            shutdown,
            task,
            reconciler,
        }
    }
}

/// Owner handle for a spawned reconciler.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    reconciler: Arc<Reconciler>,
}

impl ReconcilerHandle {
    /// Current counters.
    pub fn stats(&self) -> ReconcilerStats {
        self.reconciler.stats()
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals shutdown, waits for the loop to exit and returns the final
    /// counters.
    pub async fn shutdown(self) -> ReconcilerStats {
        self.join().await.stats()
    }

    /// Like [`ReconcilerHandle::shutdown`], then drains whatever is still
    /// queued before returning.
    pub async fn shutdown_and_flush(self) -> ReconcilerStats {
        let reconciler = self.join().await;
        let flusher = Arc::clone(&reconciler);
        if let Err(err) = task::spawn_blocking(move || flusher.flush()).await {
            error!(error = %err, "reconciler.flush_aborted");
        }
        reconciler.stats()
    }

    async fn join(self) -> Arc<Reconciler> {
        // An Err means the loop already exited and dropped its receiver.
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "reconciler.join_failed");
        }
        self.reconciler
    }
}
