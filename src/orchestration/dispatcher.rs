use crate::domain::{Job, JobStatus, RawJob};
use crate::engine::{JobOutcome, RetryError, RetryPolicy, SettlementEngine};
use crate::gateway::{GatewayError, JobQueue};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Default interval between queue polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Outcome of an executed job whose status report has not reached the queue.
type Unreported = HashMap<String, (JobStatus, serde_json::Value)>;

/// Polls the job queue and runs jobs one at a time.
///
/// A job is executed at most once per dispatcher. When its status report
/// cannot be delivered, the outcome is held in memory and the report is
/// replayed on later polls instead of running the job again.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    engine: Arc<SettlementEngine>,
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
    retry: RetryPolicy,
    unreported: Arc<Mutex<Unreported>>,
}

impl JobDispatcher {
    pub fn new(engine: Arc<SettlementEngine>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            engine,
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            unreported: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Retry policy for queue calls (status reports, follow-up enqueues).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Poll until `shutdown` flips to true or its sender is dropped. A job
    /// already running when shutdown arrives is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job dispatcher started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => info!(jobs = n, "Processed pending jobs"),
                Err(e) => warn!(error = %e, "Job poll failed"),
            }

            if *shutdown.borrow() {
                break;
            }
        }
        info!("Job dispatcher stopped");
    }

    /// Replay held reports, then fetch pending jobs and process them in
    /// order. Returns how many were fetched. A job whose report fails is
    /// logged and held; the rest of the batch still runs.
    pub async fn poll_once(&self) -> Result<usize, DispatchError> {
        self.replay_unreported().await;

        let jobs = self.queue.fetch_pending().await?;
        let count = jobs.len();
        for raw in jobs {
            let job_id = raw.id.clone();
            if let Err(e) = self.process_job(raw).await {
                warn!(job_id = %job_id, error = %e, "Job status not reported");
            }
        }
        Ok(count)
    }

    /// Number of finished jobs whose report is still owed to the queue.
    pub fn unreported(&self) -> usize {
        self.held().len()
    }

    /// Validate, execute and report a single job. Returns the status it was
    /// reported with. A job with a held outcome is reported, not executed.
    pub async fn process_job(&self, raw: RawJob) -> Result<JobStatus, DispatchError> {
        let job_id = raw.id.clone();
        let held = self.held().remove(&job_id);
        if let Some((status, details)) = held {
            info!(job_id = %job_id, status = %status, "Replaying held status report");
            self.deliver(&job_id, status, details).await?;
            return Ok(status);
        }

        let job = match Job::try_from(raw) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Rejected job");
                let details = json!({ "error": e.to_string(), "kind": e.kind() });
                self.deliver(&job_id, JobStatus::Failed, details).await?;
                return Ok(JobStatus::Failed);
            }
        };

        info!(job_id = %job.id, pool = %job.pool, action = job.action.name(), "Executing job");
        let (status, details) = match self.engine.execute(&job).await {
            Ok(outcome) => {
                let mut details = outcome.to_details();
                match self.enqueue_follow_up(&job, &outcome).await {
                    Ok(Some(follow_up_id)) => details["follow_up_job"] = json!(follow_up_id),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Recommended trade not queued");
                        details["follow_up_error"] = json!(e.to_string());
                    }
                }
                (JobStatus::Complete, details)
            }
            Err(e) => {
                let status = e.job_status();
                if status == JobStatus::Stuck {
                    error!(job_id = %job.id, pool = %job.pool, error = %e, "Job stuck, needs reconciliation");
                } else {
                    warn!(job_id = %job.id, pool = %job.pool, error = %e, "Job failed");
                }
                (status, e.to_details())
            }
        };

        self.deliver(&job.id, status, details).await?;
        Ok(status)
    }

    /// Report a finished job, holding the outcome for replay if the queue
    /// stays unreachable.
    async fn deliver(
        &self,
        job_id: &str,
        status: JobStatus,
        details: serde_json::Value,
    ) -> Result<(), DispatchError> {
        if let Err(e) = self.report(job_id, status, &details).await {
            error!(job_id, status = %status, error = %e, "Status report failed, holding outcome");
            self.held().insert(job_id.to_string(), (status, details));
            return Err(e);
        }
        Ok(())
    }

    async fn replay_unreported(&self) {
        let pending: Vec<(String, (JobStatus, serde_json::Value))> =
            self.held().drain().collect();
        for (job_id, (status, details)) in pending {
            if self.deliver(&job_id, status, details).await.is_ok() {
                info!(job_id = %job_id, status = %status, "Held status report delivered");
            }
        }
    }

    fn held(&self) -> MutexGuard<'_, Unreported> {
        self.unreported.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the trade a recommendation asked for.
    async fn enqueue_follow_up(
        &self,
        job: &Job,
        outcome: &JobOutcome,
    ) -> Result<Option<String>, DispatchError> {
        let JobOutcome::Recommend(rec) = outcome else {
            return Ok(None);
        };
        let Some(action) = rec.follow_up() else {
            return Ok(None);
        };
        let queue = self.queue.clone();
        let id = self
            .retry
            .run("queue.enqueue", || queue.enqueue(&job.pool, &action))
            .await
            .map_err(DispatchError::from)?;
        info!(job_id = %job.id, follow_up = %id, action = action.name(), "Queued recommended trade");
        Ok(Some(id))
    }

    async fn report(
        &self,
        job_id: &str,
        status: JobStatus,
        details: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let queue = self.queue.clone();
        self.retry
            .run("queue.report_status", || {
                queue.report_status(job_id, status, details)
            })
            .await
            .map_err(DispatchError::from)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job queue error: {0}")]
    Queue(#[from] GatewayError),
}

impl From<RetryError> for DispatchError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Exhausted { error, .. } | RetryError::Permanent(error) => {
                DispatchError::Queue(error)
            }
        }
    }
}
