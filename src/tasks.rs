use crate::pipeline::{IngestPipeline, ItemOutcome, ItemState};
use crate::types::RawEventData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One unit of work: a raw listing for a site
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub site_key: String,
    pub raw: RawEventData,
}

/// Counts of terminal states seen by a queue over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub upserted: u64,
    pub rejected: u64,
    pub extraction_failed: u64,
    pub persist_failed: u64,
    pub unsupported: u64,
    pub panicked: u64,
}

impl QueueStats {
    pub fn processed(&self) -> u64 {
        self.upserted
            + self.rejected
            + self.extraction_failed
            + self.persist_failed
            + self.unsupported
            + self.panicked
    }
}

#[derive(Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    upserted: AtomicU64,
    rejected: AtomicU64,
    extraction_failed: AtomicU64,
    persist_failed: AtomicU64,
    unsupported: AtomicU64,
    panicked: AtomicU64,
}

impl QueueCounters {
    fn record(&self, outcome: &ItemOutcome) {
        let counter = match outcome.state {
            ItemState::Upserted => &self.upserted,
            ItemState::Rejected => &self.rejected,
            ItemState::ExtractionFailed => &self.extraction_failed,
            ItemState::PersistFailed => &self.persist_failed,
            ItemState::Unsupported => &self.unsupported,
            other => {
                warn!(state = other.as_str(), "Item finished in a non-terminal state");
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            upserted: self.upserted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            extraction_failed: self.extraction_failed.load(Ordering::Relaxed),
            persist_failed: self.persist_failed.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Background worker pool. `enqueue` returns immediately; items are processed
/// concurrently, at most `concurrency` at a time, with no ordering guarantee.
///
/// Delivery is at-least-once: the same listing may be processed more than
/// once and relies on the external_id upsert key to stay idempotent.
pub struct IngestQueue {
    sender: mpsc::UnboundedSender<IngestJob>,
    worker: JoinHandle<()>,
    counters: Arc<QueueCounters>,
}

impl IngestQueue {
    /// Spawn the dispatcher loop on the current tokio runtime
    pub fn start(pipeline: Arc<IngestPipeline>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, mut receiver) = mpsc::unbounded_channel::<IngestJob>();
        let counters = Arc::new(QueueCounters::default());
        let worker_counters = counters.clone();

        let worker = tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));
            info!("Ingest queue started with {} workers", concurrency);

            while let Some(job) = receiver.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Worker semaphore closed: {}", e);
                        break;
                    }
                };
                let pipeline = pipeline.clone();
                let counters = worker_counters.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    // Inner task so a panic is counted instead of lost
                    let handle =
                        tokio::spawn(async move { pipeline.process(&job.site_key, &job.raw).await });
                    match handle.await {
                        Ok(outcome) => counters.record(&outcome),
                        Err(e) => {
                            error!("Ingest task panicked: {}", e);
                            counters.panicked.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }

            // Channel closed: wait for in-flight items by taking every permit
            if let Err(e) = semaphore.acquire_many(concurrency as u32).await {
                error!("Failed to drain workers: {}", e);
            }
            debug!("Ingest queue drained");
        });

        Self {
            sender,
            worker,
            counters,
        }
    }

    /// Fire-and-forget submission. Returns false once the queue has shut down.
    pub fn enqueue(&self, site_key: impl Into<String>, raw: RawEventData) -> bool {
        let job = IngestJob {
            site_key: site_key.into(),
            raw,
        };
        match self.sender.send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("ingest_enqueued_total").increment(1);
                true
            }
            Err(e) => {
                warn!("Queue closed, dropping item for {}", e.0.site_key);
                false
            }
        }
    }

    /// Statistics so far, without stopping the queue
    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// Stop accepting work, wait for every queued item to finish, and report
    pub async fn shutdown(self) -> QueueStats {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            error!("Ingest queue dispatcher failed: {}", e);
        }
        let stats = self.counters.snapshot();
        info!(
            enqueued = stats.enqueued,
            upserted = stats.upserted,
            rejected = stats.rejected,
            extraction_failed = stats.extraction_failed,
            persist_failed = stats.persist_failed,
            "Ingest queue shut down"
        );
        stats
    }
}

/// An item that failed extraction or persistence, kept for inspection or retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub site_key: String,
    pub external_id: Option<String>,
    pub raw: RawEventData,
    pub stage: ItemState,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        site_key: &str,
        external_id: Option<&str>,
        raw: RawEventData,
        stage: ItemState,
        reason: String,
    ) -> Self {
        Self {
            site_key: site_key.to_string(),
            external_id: external_id.map(str::to_string),
            raw,
            stage,
            reason,
            failed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, letter: DeadLetter) {
        metrics::counter!("ingest_dead_letters_total", "stage" => letter.stage.as_str()).increment(1);
        match self.entries.lock() {
            Ok(mut entries) => entries.push(letter),
            Err(poisoned) => poisoned.into_inner().push(letter),
        }
    }

    pub fn entries(&self) -> Vec<DeadLetter> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn drain(&self) -> Vec<DeadLetter> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every dead letter back onto a queue. Letters the queue refuses
    /// are kept. Returns how many were resubmitted.
    pub fn requeue(&self, queue: &IngestQueue) -> usize {
        let mut resubmitted = 0;
        for letter in self.drain() {
            if queue.enqueue(letter.site_key.clone(), letter.raw.clone()) {
                resubmitted += 1;
            } else {
                self.push(letter);
            }
        }
        info!("Requeued {} dead letters", resubmitted);
        resubmitted
    }
}
