use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobReason {
    Uploaded,
    RetryDue,
    Stale,
    Recovered,
}

impl std::fmt::Display for JobReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uploaded => write!(f, "uploaded"),
            Self::RetryDue => write!(f, "retry_due"),
            Self::Stale => write!(f, "stale"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub document_id: String,
    pub reason: JobReason,
}

/// Sending half of the job channel. Never blocks: a full queue drops the
/// job and the stale sweep picks the document up later.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, document_id: &str, reason: JobReason) -> bool {
        let job = Job {
            document_id: document_id.to_string(),
            reason,
        };
        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(doc_id = %document_id, reason = %reason, "Job enqueued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(doc_id = %document_id, reason = %reason, "Job queue full; leaving document for the sweeper");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(doc_id = %document_id, "Job queue closed");
                false
            }
        }
    }
}

/// Bounded pool of worker slots; each slot processes one document at a time.
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    slots: usize,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, slots: usize) -> Self {
        Self {
            pipeline,
            slots: slots.max(1),
        }
    }

    /// Consume jobs until the channel closes or `cancel` fires, then wait for
    /// in-flight jobs to finish.
    pub async fn run(self, mut receiver: mpsc::Receiver<Job>, cancel: CancellationToken) {
        info!(slots = self.slots, "Worker pool started");
        let semaphore = Arc::new(Semaphore::new(self.slots));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Worker task ended abnormally");
                    }
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let pipeline = Arc::clone(&self.pipeline);
            tasks.spawn(async move {
                let _permit = permit;
                let document_id = job.document_id.clone();
                if let Err(e) = pipeline.handle_job(job).await {
                    error!(doc_id = %document_id, error = %e, "Job failed");
                }
            });
        }

        info!(in_flight = tasks.len(), "Worker pool stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

/// Periodically wake due retries and re-enqueue stale documents.
pub async fn run_sweeper(pipeline: Arc<Pipeline>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Retry sweeper started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Retry sweeper shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                match pipeline.sweep(Utc::now()).await {
                    Ok(report)
                        if !report.woken.is_empty()
                            || !report.requeued.is_empty()
                            || !report.resumed.is_empty() =>
                    {
                        info!(
                            woken = report.woken.len(),
                            requeued = report.requeued.len(),
                            resumed = report.resumed.len(),
                            "Sweep enqueued documents"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Retry sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (queue, mut receiver) = JobQueue::channel(1);
        assert!(queue.enqueue("a", JobReason::Uploaded));
        assert!(!queue.enqueue("b", JobReason::Uploaded));

        let job = receiver.try_recv().unwrap();
        assert_eq!(job.document_id, "a");
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_reports_failure() {
        let (queue, receiver) = JobQueue::channel(2);
        drop(receiver);
        assert!(!queue.enqueue("a", JobReason::RetryDue));
    }
}
