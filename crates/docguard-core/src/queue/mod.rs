//! Durable moderation queue with a bounded worker pool.
//!
//! Jobs live in a [`JobStore`]. Each document has at most one active job;
//! failed attempts are retried with exponential backoff and end up in the
//! dead set once their attempt budget is spent.

mod backoff;
mod job;
mod worker;

pub use backoff::{base_delay, retry_delay};
pub use job::{EnqueueOutcome, JobState, ModerationJob, QueueStats};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::analyzer::{AnalysisResult, Analyzer, ModerationDecision};
use crate::config::{DecisionThresholds, QueueConfig};
use crate::document::{DocumentId, DocumentMetadata};
use crate::storage::JobStore;
use crate::{Error, Result};
use worker::WorkerContext;

/// Slack on top of the job timeout before a claimed job may be taken by another worker.
const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Receives the outcome of every job. Implemented by the document store.
///
/// Delivery is at least once: a job is removed only after its decision has
/// been handed over, so a crash or a failed store write in between leads to
/// the same document being decided again. Implementations should treat a
/// repeated decision for a document as an update.
#[async_trait::async_trait]
pub trait DecisionSink: Send + Sync {
    /// Called for every completed job.
    async fn on_decision(
        &self,
        document_id: &DocumentId,
        decision: ModerationDecision,
        result: &AnalysisResult,
    );

    /// Called once when a job exhausts its retries.
    async fn on_dead(&self, document_id: &DocumentId, last_error: &str);
}

pub struct ModerationQueue {
    context: Arc<WorkerContext>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<JoinSet<()>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ModerationQueue {
    #[must_use]
    pub fn new(
        store: JobStore,
        analyzer: Arc<Analyzer>,
        sink: Arc<dyn DecisionSink>,
        config: QueueConfig,
        thresholds: DecisionThresholds,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            context: Arc::new(WorkerContext {
                store: Arc::new(store.with_lease(config.job_timeout + LEASE_MARGIN)),
                analyzer,
                sink,
                config,
                thresholds,
                wake: Notify::new(),
            }),
            shutdown,
            workers: Mutex::new(JoinSet::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Recover jobs orphaned by a previous process and start the workers.
    pub async fn init(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let recovered = self.context.store.recover_in_progress().await?;
        if recovered > 0 {
            warn!(recovered, "requeued jobs left in progress by a previous run");
        }

        let mut workers = self.workers.lock().await;
        for worker in 0..self.context.config.worker_count {
            let context = Arc::clone(&self.context);
            workers.spawn(context.run(worker, self.shutdown.subscribe()));
        }

        info!(
            workers = self.context.config.worker_count,
            max_attempts = self.context.config.max_attempts,
            "moderation queue started"
        );
        Ok(())
    }

    pub async fn enqueue(
        &self,
        document_id: DocumentId,
        file_path: impl Into<PathBuf>,
        metadata: DocumentMetadata,
    ) -> Result<EnqueueOutcome> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }

        let job = ModerationJob::new(document_id, file_path.into(), metadata);
        let outcome = self.context.store.enqueue(&job).await?;

        match outcome {
            EnqueueOutcome::Enqueued(job_id) => {
                info!(%job_id, document_id = %job.document_id, "job enqueued");
                self.context.wake.notify_one();
            }
            EnqueueOutcome::Duplicate(job_id) => {
                debug!(%job_id, document_id = %job.document_id, "document already queued");
            }
        }

        Ok(outcome)
    }

    /// Drop a job that has not started. Returns false if nothing was waiting.
    pub async fn cancel(&self, document_id: &DocumentId) -> Result<bool> {
        let cancelled = self.context.store.cancel(document_id).await?;
        if cancelled {
            info!(%document_id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Put a dead job back in the queue with a fresh attempt budget.
    pub async fn revive(&self, document_id: &DocumentId) -> Result<uuid::Uuid> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }

        let job_id = self.context.store.revive(document_id).await?;
        info!(%job_id, %document_id, "dead job revived");
        self.context.wake.notify_one();
        Ok(job_id)
    }

    pub async fn dead_jobs(&self) -> Result<Vec<ModerationJob>> {
        self.context.store.dead_jobs().await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.context.store.stats().await
    }

    /// Wait until no job is queued, running or waiting to retry.
    pub async fn wait_idle(&self) -> Result<()> {
        if !self.is_running() {
            return Err(Error::QueueNotInitialized);
        }

        while self.stats().await?.active() > 0 {
            tokio::time::sleep(self.context.config.poll_interval).await;
        }
        Ok(())
    }

    /// Stop claiming jobs, let running ones finish within the drain timeout, then close the store.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("moderation queue shutting down");
        self.shutdown.send_replace(true);

        let mut workers = self.workers.lock().await;
        let drain = async {
            while workers.join_next().await.is_some() {}
        };

        if tokio::time::timeout(self.context.config.drain_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                remaining = workers.len(),
                "drain timeout elapsed; aborting running jobs"
            );
            workers.shutdown().await;
        }

        self.context.store.close().await;
        info!("moderation queue stopped");
        Ok(())
    }
}
