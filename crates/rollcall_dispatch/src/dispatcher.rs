//! The dispatch loop: claims due jobs per size-class queue, runs attempts
//! under per-queue concurrency caps, and applies the retry policy.

use chrono::Utc;
use rollcall_db::{DbError, ImportJob, ProgressCache, RollcallDb};
use rollcall_protocol::types::{JobId, JobStatus, QueueClass};
use rollcall_protocol::EngineConfig;
use rollcall_worker::{fail_permanently, AttemptOutcome, CancellationToken, ImportWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// What to do with a transiently-failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Backoff(Duration),
    FailPermanently,
}

/// Pure retry policy: bounded attempts with a fixed backoff schedule, all
/// inside the job's retry window.
pub fn retry_decision(
    attempts: u32,
    retry_until: Option<i64>,
    now: i64,
    config: &EngineConfig,
) -> RetryDecision {
    if attempts >= config.max_attempts {
        return RetryDecision::FailPermanently;
    }
    let delay = config.backoff_after(attempts);
    if let Some(deadline) = retry_until {
        if now + delay.as_secs() as i64 >= deadline {
            return RetryDecision::FailPermanently;
        }
    }
    RetryDecision::Backoff(delay)
}

/// Claims and runs jobs. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct Dispatcher {
    db: RollcallDb,
    cache: Arc<ProgressCache>,
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(db: RollcallDb, config: EngineConfig) -> Self {
        let cache = Arc::new(ProgressCache::new(config.progress_cache_ttl));
        Self { db, cache, config }
    }

    pub fn cache(&self) -> Arc<ProgressCache> {
        Arc::clone(&self.cache)
    }

    /// Claim lease: a crashed attempt redelivers once this has passed.
    fn lease_secs(&self) -> i64 {
        self.config.attempt_timeout.as_secs() as i64 + 60
    }

    fn retry_window_secs(&self) -> i64 {
        self.config.retry_window.as_secs() as i64
    }

    /// Main loop: poll each queue, spawn attempts up to its concurrency cap,
    /// back off when idle. Runs until `shutdown` trips, then drains.
    pub async fn run(&self, shutdown: CancellationToken) {
        let queues = [QueueClass::Small, QueueClass::Medium, QueueClass::Large];
        let semaphores: Vec<Arc<Semaphore>> = self
            .config
            .queue_workers
            .iter()
            .map(|&workers| Arc::new(Semaphore::new(workers.max(1))))
            .collect();
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!("dispatcher started");
        while !shutdown.is_cancelled() {
            while tasks.try_join_next().is_some() {}

            let mut dispatched = false;
            for (queue, semaphore) in queues.iter().zip(&semaphores) {
                if semaphore.available_permits() == 0 {
                    continue;
                }
                let now = Utc::now().timestamp();
                match self
                    .db
                    .claim_due_job(*queue, now, self.lease_secs(), self.retry_window_secs())
                    .await
                {
                    Ok(Some(job)) => {
                        let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
                            continue;
                        };
                        let this = self.clone();
                        tasks.spawn(async move {
                            this.run_claimed(job).await;
                            drop(permit);
                        });
                        dispatched = true;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(queue = %queue, "queue claim failed: {e}"),
                }
            }

            if !dispatched {
                tokio::time::sleep(self.config.dispatch_poll).await;
            }
        }

        while tasks.join_next().await.is_some() {}
        info!("dispatcher stopped");
    }

    /// One claimed job through one attempt, with the hard timeout, then the
    /// outcome policy.
    pub async fn run_claimed(&self, job: ImportJob) {
        let owner = format!("dispatch-{}-{}", job.queue_class, Uuid::new_v4());
        let worker = ImportWorker::new(
            self.db.clone(),
            Arc::clone(&self.cache),
            self.config.clone(),
            owner,
        );
        let job_id = job.id;

        // The token's deadline lets the worker stop cleanly between chunks;
        // the outer timeout is the queue's kill switch.
        let cancel = CancellationToken::with_timeout(self.config.attempt_timeout);
        let hard_cap = self.config.attempt_timeout + Duration::from_secs(60);
        let outcome =
            match tokio::time::timeout(hard_cap, worker.run_attempt(&job_id, &cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => AttemptOutcome::Retry("attempt killed after timeout".to_string()),
            };

        let now = Utc::now().timestamp();
        match outcome {
            AttemptOutcome::Completed => info!(%job_id, "job completed"),
            AttemptOutcome::AlreadyTerminal => {}
            AttemptOutcome::Failed(reason) => warn!(%job_id, %reason, "job failed"),
            AttemptOutcome::Deferred => {
                let delay = self.config.lock_retry_delay.as_secs() as i64;
                if let Err(e) = self.db.defer_job(&job_id, now, delay).await {
                    warn!(%job_id, "could not defer job: {e}");
                }
            }
            AttemptOutcome::Retry(reason) => self.handle_retry(&job_id, &reason, now).await,
        }
    }

    async fn handle_retry(&self, job_id: &JobId, reason: &str, now: i64) {
        let job = match self.db.require_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(%job_id, "could not reload job after retryable failure: {e}");
                return;
            }
        };
        match retry_decision(job.attempts, job.retry_until, now, &self.config) {
            RetryDecision::Backoff(delay) => {
                info!(%job_id, attempts = job.attempts, delay_secs = delay.as_secs(), "scheduling retry");
                if let Err(e) = self
                    .db
                    .requeue_job(job_id, now, delay.as_secs() as i64)
                    .await
                {
                    warn!(%job_id, "could not requeue job: {e}");
                }
            }
            RetryDecision::FailPermanently => {
                warn!(%job_id, attempts = job.attempts, "retries exhausted");
                if let Err(e) =
                    fail_permanently(&self.db, job_id, &format!("retries exhausted: {reason}"))
                        .await
                {
                    warn!(%job_id, "could not record permanent failure: {e}");
                }
                self.cache.invalidate(job_id);
            }
        }
    }

    /// Run attempts for one job's queue until that job reaches a terminal
    /// status. Used by the synchronous CLI import.
    pub async fn drain_job(&self, job_id: &JobId) -> Result<ImportJob, DbError> {
        loop {
            let job = self.db.require_job(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }

            let now = Utc::now().timestamp();
            if job.status == JobStatus::Pending && job.next_attempt_at > now {
                let wait = (job.next_attempt_at - now).max(1) as u64;
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            match self
                .db
                .claim_due_job(job.queue_class, now, self.lease_secs(), self.retry_window_secs())
                .await?
            {
                Some(claimed) => self.run_claimed(claimed).await,
                None => tokio::time::sleep(self.config.dispatch_poll).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn retry_backoff_follows_the_schedule() {
        let config = config();
        let now = 1_000_000;
        let window = Some(now + 7_200);

        assert_eq!(
            retry_decision(1, window, now, &config),
            RetryDecision::Backoff(Duration::from_secs(30))
        );
        assert_eq!(
            retry_decision(2, window, now, &config),
            RetryDecision::Backoff(Duration::from_secs(60))
        );
        assert_eq!(
            retry_decision(3, window, now, &config),
            RetryDecision::FailPermanently
        );
    }

    #[test]
    fn retry_window_cuts_off_late_retries() {
        let config = config();
        let now = 1_000_000;

        // Next backoff would land past the window.
        assert_eq!(
            retry_decision(1, Some(now + 10), now, &config),
            RetryDecision::FailPermanently
        );
        // No window recorded yet: schedule normally.
        assert_eq!(
            retry_decision(1, None, now, &config),
            RetryDecision::Backoff(Duration::from_secs(30))
        );
    }
}
