//! Job execution: claims due jobs, runs the matching task, records the outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{QueueSettings, SiteSettings};
use crate::db::{DbClient, JobRecord};
use crate::provisioning::ProvisioningApiFactory;
use crate::queue::{unix_now, FailureOutcome, RetryPolicy, TaskKind};
use crate::tasks::{run_task, TaskContext};

#[derive(Clone)]
pub struct Worker {
    db: DbClient,
    apis: Arc<dyn ProvisioningApiFactory>,
    site_settings: SiteSettings,
    policy: RetryPolicy,
    lease_timeout_seconds: i64,
    execution_timeout: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(
        db: DbClient,
        apis: Arc<dyn ProvisioningApiFactory>,
        site_settings: SiteSettings,
        queue_settings: &QueueSettings,
    ) -> Self {
        Self {
            db,
            apis,
            site_settings,
            policy: RetryPolicy::from_settings(queue_settings),
            lease_timeout_seconds: i64::try_from(queue_settings.lease_timeout_seconds)
                .unwrap_or(i64::MAX),
            execution_timeout: Duration::from_secs((queue_settings.lease_timeout_seconds / 2).max(1)),
        }
    }

    /// Claims and runs one due job. Returns whether a job was claimed.
    ///
    /// Task failures are recorded on the job, not returned. A task still running after half the
    /// lease is abandoned and counted as a failed attempt, so an expired lease never has a live
    /// holder.
    ///
    /// # Errors
    /// Returns an error if the job store cannot be read or updated.
    pub async fn run_next(&self, now: i64) -> Result<bool> {
        let Some(job) = self.db.claim_next_job(now).await? else {
            return Ok(false);
        };

        info!(job_id = job.id, kind = %job.kind, branch_id = %job.branch_id, attempt = job.attempts, "job started");

        let outcome = tokio::time::timeout(self.execution_timeout, self.execute(&job))
            .await
            .unwrap_or_else(|_| {
                Err(anyhow!(
                    "task exceeded {}s and was abandoned",
                    self.execution_timeout.as_secs()
                ))
            });

        match outcome {
            Ok(()) => {
                if self.db.complete_job(&job).await? {
                    info!(job_id = job.id, kind = %job.kind, "job completed");
                } else {
                    warn!(job_id = job.id, kind = %job.kind, "job lease lost before completion");
                }
            }
            Err(failure) => {
                let message = format!("{failure:#}");
                match self.db.fail_job(&job, &message, &self.policy, now).await? {
                    FailureOutcome::Retrying { run_at } => warn!(
                        job_id = job.id,
                        kind = %job.kind,
                        attempt = job.attempts,
                        retry_in_seconds = run_at - now,
                        error = %message,
                        "job failed; retrying"
                    ),
                    FailureOutcome::DeadLettered => error!(
                        job_id = job.id,
                        kind = %job.kind,
                        branch_id = %job.branch_id,
                        attempts = job.attempts,
                        error = %message,
                        "job dead-lettered; remaining chain cancelled"
                    ),
                    FailureOutcome::LeaseLost => warn!(
                        job_id = job.id,
                        kind = %job.kind,
                        error = %message,
                        "job lease lost; failure not recorded"
                    ),
                }
            }
        }

        Ok(true)
    }

    /// Returns jobs whose lease expired (their worker died) to the queue.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn recover_stale_jobs(&self, now: i64) -> Result<u64> {
        let recovered = self
            .db
            .requeue_stale_jobs(now.saturating_sub(self.lease_timeout_seconds))
            .await?;
        if recovered > 0 {
            warn!(recovered, "requeued jobs with expired leases");
        }

        Ok(recovered)
    }

    async fn execute(&self, job: &JobRecord) -> Result<()> {
        let kind: TaskKind = job.kind.parse()?;
        let branch = self
            .db
            .get_branch_by_id(&job.branch_id)
            .await?
            .ok_or_else(|| anyhow!("branch {} not found", job.branch_id))?;
        let project = self
            .db
            .get_project_by_id(&branch.project_id)
            .await?
            .ok_or_else(|| anyhow!("project {} not found", branch.project_id))?;
        let api_token = self
            .db
            .get_user_api_token(&project.user_id)
            .await?
            .ok_or_else(|| anyhow!("user {} has no API token", project.user_id))?;

        let api = self.apis.client(&api_token);
        let context = TaskContext {
            db: &self.db,
            api: api.as_ref(),
            project: &project,
            branch: &branch,
            site_settings: &self.site_settings,
        };

        run_task(kind, &context).await
    }

    /// Spawns `worker_count` polling loops that stop once `shutdown` flips to true.
    #[must_use]
    pub fn spawn(
        self,
        queue_settings: &QueueSettings,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let poll_interval = Duration::from_millis(queue_settings.poll_interval_ms.max(1));

        (0..queue_settings.worker_count.max(1))
            .map(|index| {
                let worker = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.poll(index, poll_interval, shutdown).await })
            })
            .collect()
    }

    async fn poll(&self, index: usize, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(worker = index, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = unix_now();
            match self.run_next(now).await {
                Ok(true) => continue,
                Ok(false) => {
                    if let Err(failure) = self.recover_stale_jobs(now).await {
                        error!(worker = index, error = %failure, "lease recovery failed");
                    }
                }
                Err(failure) => error!(worker = index, error = %failure, "job queue unavailable"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!(worker = index, "worker stopped");
    }
}
