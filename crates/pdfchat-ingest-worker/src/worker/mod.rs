pub mod processor;
pub mod reconcile;

pub use processor::IngestProcessor;
pub use reconcile::ReconcileSweep;

use crate::config::Settings;
use crate::database::{DbPool, NotificationListener, Repository};
use crate::embedding::HttpEmbedder;
use anyhow::Result;
use pdfchat_core::jobs::{FailureOutcome, JobQueue, INGEST_JOB_NAME};
use pdfchat_core::vector::VectorStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub struct Worker {
    settings: Settings,
    repository: Arc<Repository>,
    listener: NotificationListener,
    queue: JobQueue,
    processor: Arc<IngestProcessor>,
}

impl Worker {
    pub fn new(settings: Settings, db_pool: DbPool) -> Self {
        let repository = Arc::new(Repository::new(db_pool.clone()));

        let listener = NotificationListener::new(
            settings.database.clone(),
            settings.database.listen_channel.clone(),
        );

        let queue = JobQueue::new(db_pool.clone(), settings.database.listen_channel.clone());

        let embedder = Arc::new(HttpEmbedder::new(settings.embedding.clone()));

        let processor = Arc::new(IngestProcessor::new(
            settings.chunking.clone(),
            settings.worker.max_file_size_mb,
            embedder,
            VectorStore::new(db_pool),
        ));

        Self {
            settings,
            repository,
            listener,
            queue,
            processor,
        }
    }

    /// Main worker loop: a pool of job consumers, woken by LISTEN/NOTIFY
    /// with a polling fallback, plus periodic stale-job recovery.
    pub async fn run(self) -> Result<()> {
        info!("Worker started");

        let mut notification_rx = self.listener.start().await?;
        let wakeup = Arc::new(Notify::new());

        // Repair the enqueue-failure gap before consuming: documents that
        // never got a job are re-enqueued here.
        let sweep = ReconcileSweep::new(
            self.repository.clone(),
            self.queue.clone(),
            self.settings.worker.max_attempts,
        );
        match sweep.run().await {
            Ok(count) if count > 0 => info!("Reconciliation sweep re-enqueued {} documents", count),
            Ok(_) => {}
            Err(e) => error!("Reconciliation sweep failed: {}", e),
        }

        // Consumer pool
        let mut handles = Vec::with_capacity(self.settings.worker.concurrency);

        for consumer_id in 0..self.settings.worker.concurrency {
            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let wakeup = wakeup.clone();
            let poll_interval = Duration::from_secs(self.settings.worker.poll_interval_seconds);

            handles.push(tokio::spawn(async move {
                loop {
                    match queue.claim(INGEST_JOB_NAME).await {
                        Ok(Some(job)) => {
                            info!(
                                "Consumer {} processing job {} (document {}, attempt {})",
                                consumer_id, job.id, job.payload.document_id, job.attempts
                            );

                            match processor.process(&job.payload).await {
                                Ok(_) => {
                                    if let Err(e) = queue.complete(job.id).await {
                                        error!("Failed to mark job {} completed: {}", job.id, e);
                                    } else {
                                        info!("Job {} completed", job.id);
                                    }
                                }
                                Err(e) => {
                                    // Per-job isolation: a failed document
                                    // never takes the consumer down.
                                    error!("Job {} failed: {}", job.id, e);
                                    match queue.fail(job.id, &e.to_string()).await {
                                        Ok(FailureOutcome::Dead) => {
                                            warn!(
                                                "Job {} dead-lettered after {} attempts",
                                                job.id, job.attempts
                                            );
                                        }
                                        Ok(FailureOutcome::Retrying) => {
                                            debug!("Job {} returned to pending", job.id);
                                        }
                                        Err(e) => {
                                            error!("Failed to record job failure: {}", e);
                                        }
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = wakeup.notified() => {}
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                        Err(e) => {
                            error!("Failed to claim job: {}", e);
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
            }));
        }

        // Main loop: notifications, stale recovery, shutdown
        let mut stale_timer = tokio::time::interval(Duration::from_secs(
            self.settings.worker.stale_after_seconds.max(1) as u64,
        ));

        loop {
            tokio::select! {
                Some(notification) = notification_rx.recv() => {
                    debug!("Notified of job {}", notification.job_id);
                    wakeup.notify_one();
                }

                _ = stale_timer.tick() => {
                    match self.queue.recover_stale(self.settings.worker.stale_after_seconds).await {
                        Ok(recovered) if recovered > 0 => {
                            warn!("Recovered {} stale jobs", recovered);
                            wakeup.notify_waiters();
                        }
                        Ok(_) => {}
                        Err(e) => error!("Stale job recovery failed: {}", e),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Shutting down worker...");
        for handle in handles {
            handle.abort();
        }

        info!("Worker stopped");
        Ok(())
    }
}
