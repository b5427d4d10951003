use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::backoff::retry_delay;
use super::{DecisionSink, ModerationJob};
use crate::analyzer::{AnalysisError, AnalysisResult, Analyzer, ModerationDecision, RetryClass};
use crate::config::{DecisionThresholds, QueueConfig};
use crate::storage::JobStore;

/// Attempt budget for failures that are worth exactly one retry.
const RETRY_ONCE_ATTEMPTS: u32 = 2;

/// State shared by every worker task.
pub(crate) struct WorkerContext {
    pub store: Arc<JobStore>,
    pub analyzer: Arc<Analyzer>,
    pub sink: Arc<dyn DecisionSink>,
    pub config: QueueConfig,
    pub thresholds: DecisionThresholds,
    pub wake: Notify,
}

impl WorkerContext {
    pub(crate) async fn run(self: Arc<Self>, worker: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker, "moderation worker started");

        while !*shutdown.borrow() {
            match self.store.claim_next().await {
                Ok(Some(job)) => self.process(worker, job).await,
                Ok(None) => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        () = self.wake.notified() => {}
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker, error = %e, "failed to claim job");
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        info!(worker, "moderation worker stopped");
    }

    async fn process(&self, worker: usize, job: ModerationJob) {
        info!(
            worker,
            job_id = %job.id,
            document_id = %job.document_id,
            attempt = job.attempt,
            "processing job"
        );

        let analysis = self.analyze(&job).await;

        match analysis {
            Ok(result) => {
                let decision = ModerationDecision::from_score(result.score, &self.thresholds);
                info!(
                    job_id = %job.id,
                    document_id = %job.document_id,
                    score = result.score,
                    model_version = %result.model_version,
                    %decision,
                    "moderation complete"
                );

                self.sink.on_decision(&job.document_id, decision, &result).await;

                // A row left behind here is reclaimed once its lease expires.
                if let Err(e) = self.store.complete(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to remove completed job");
                }
            }
            Err(err) => self.fail(&job, &err).await,
        }
    }

    /// Run the analysis in its own task so a panic or a timeout only fails this job.
    async fn analyze(&self, job: &ModerationJob) -> Result<AnalysisResult, AnalysisError> {
        let analyzer = Arc::clone(&self.analyzer);
        let path = job.file_path.clone();
        let metadata = job.metadata.clone();

        // Dropping the set aborts the task, including when the worker itself is aborted.
        let mut task = JoinSet::new();
        task.spawn(async move { analyzer.analyze(&path, &metadata).await });

        match tokio::time::timeout(self.config.job_timeout, task.join_next()).await {
            Ok(Some(Ok(analysis))) => analysis,
            Ok(Some(Err(e))) if e.is_panic() => {
                error!(job_id = %job.id, "analysis panicked");
                Err(AnalysisError::Failed("analysis panicked".into()))
            }
            Ok(Some(Err(e))) => Err(AnalysisError::Failed(format!("analysis aborted: {e}"))),
            Ok(None) => Err(AnalysisError::Failed("analysis task missing".into())),
            Err(_) => Err(AnalysisError::Failed(format!(
                "timed out after {}s",
                self.config.job_timeout.as_secs_f64()
            ))),
        }
    }

    async fn fail(&self, job: &ModerationJob, err: &AnalysisError) {
        let attempt = job.attempt.saturating_add(1);
        let limit = match err.retry_class() {
            RetryClass::Permanent => 1,
            RetryClass::Once => RETRY_ONCE_ATTEMPTS.min(self.config.max_attempts),
            RetryClass::Backoff => self.config.max_attempts,
        };
        let message = err.to_string();

        if attempt >= limit {
            match self.store.mark_dead(job.id, attempt, &message).await {
                Ok(true) => {
                    error!(
                        job_id = %job.id,
                        document_id = %job.document_id,
                        attempt,
                        error = %message,
                        "job moved to dead set"
                    );
                    self.sink.on_dead(&job.document_id, &message).await;
                }
                Ok(false) => {}
                Err(e) => error!(job_id = %job.id, error = %e, "failed to mark job dead"),
            }
            return;
        }

        let delay = retry_delay(attempt, self.config.backoff_base, self.config.backoff_max);
        let available_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

        match self.store.schedule_retry(job.id, attempt, available_at, &message).await {
            Ok(()) => warn!(
                job_id = %job.id,
                document_id = %job.document_id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %message,
                "job failed; retry scheduled"
            ),
            Err(e) => error!(job_id = %job.id, error = %e, "failed to schedule retry"),
        }
    }
}
