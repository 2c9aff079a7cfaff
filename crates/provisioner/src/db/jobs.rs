use anyhow::Result;
use uuid::Uuid;

use crate::queue::{FailureOutcome, RetryPolicy};

use super::{DbClient, JobRecord};

type JobRow = (
    i64,
    String,
    String,
    i64,
    String,
    String,
    i64,
    i64,
    Option<String>,
    Option<String>,
);

const JOB_COLUMNS: &str =
    "id, branch_id, chain_id, position, kind, status, attempts, run_at, last_error, lease_id";

fn map_job_row(row: JobRow) -> Result<JobRecord> {
    let (id, branch_id, chain_id, position, kind, status, attempts, run_at, last_error, lease_id) =
        row;

    Ok(JobRecord {
        id,
        branch_id,
        chain_id,
        position,
        kind,
        status: status.parse()?,
        attempts,
        run_at,
        last_error,
        lease_id,
    })
}

#[allow(clippy::missing_errors_doc)]
impl DbClient {
    /// Atomically leases the oldest due job whose branch has no earlier unfinished job.
    ///
    /// Jobs of one branch therefore run one at a time, in enqueue order, across chains. Each
    /// claim carries a fresh lease id.
    pub async fn claim_next_job(&self, now: i64) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, locked_at = ?1, lease_id = ?2, updated_at = CURRENT_TIMESTAMP
            WHERE id = (
              SELECT j.id FROM jobs j
              WHERE j.status = 'pending' AND j.run_at <= ?1
                AND NOT EXISTS (
                  SELECT 1 FROM jobs e
                  WHERE e.branch_id = j.branch_id AND e.id < j.id AND e.status IN ('pending', 'running')
                )
              ORDER BY j.id ASC
              LIMIT 1
            ) AND status = 'pending'
            RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(Uuid::new_v4().to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_job_row).transpose()
    }

    /// Marks a claimed job completed. Returns false when `job` no longer holds the lease.
    pub async fn complete_job(&self, job: &JobRecord) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', locked_at = NULL, lease_id = NULL, last_error = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?1 AND status = 'running' AND lease_id = ?2",
        )
        .bind(job.id)
        .bind(&job.lease_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed attempt: reschedules with backoff while attempts remain, otherwise
    /// dead-letters the job and cancels the rest of its chain. Nothing changes when `job` no
    /// longer holds the lease.
    pub async fn fail_job(
        &self,
        job: &JobRecord,
        error: &str,
        policy: &RetryPolicy,
        now: i64,
    ) -> Result<FailureOutcome> {
        let attempts = u32::try_from(job.attempts).unwrap_or(u32::MAX);

        if policy.allows_retry(attempts) {
            let delay = i64::try_from(policy.delay_after(attempts).as_secs()).unwrap_or(i64::MAX);
            let run_at = now.saturating_add(delay);

            let result = sqlx::query(
                "UPDATE jobs SET status = 'pending', run_at = ?2, locked_at = NULL, lease_id = NULL, last_error = ?3, updated_at = CURRENT_TIMESTAMP
                WHERE id = ?1 AND status = 'running' AND lease_id = ?4",
            )
            .bind(job.id)
            .bind(run_at)
            .bind(error)
            .bind(&job.lease_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Ok(FailureOutcome::LeaseLost);
            }
            return Ok(FailureOutcome::Retrying { run_at });
        }

        let mut transaction = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', locked_at = NULL, lease_id = NULL, last_error = ?2, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?1 AND status = 'running' AND lease_id = ?3",
        )
        .bind(job.id)
        .bind(error)
        .bind(&job.lease_id)
        .execute(&mut *transaction)
        .await?;

        if result.rows_affected() == 0 {
            transaction.rollback().await?;
            return Ok(FailureOutcome::LeaseLost);
        }

        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP WHERE chain_id = ?1 AND id > ?2 AND status = 'pending'",
        )
        .bind(&job.chain_id)
        .bind(job.id)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        Ok(FailureOutcome::DeadLettered)
    }

    /// Returns jobs whose lease started at or before `locked_before` to the pending pool.
    pub async fn requeue_stale_jobs(&self, locked_before: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', locked_at = NULL, lease_id = NULL, updated_at = CURRENT_TIMESTAMP WHERE status = 'running' AND locked_at <= ?1",
        )
        .bind(locked_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_jobs_for_branch(&self, branch_id: &str) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE branch_id = ?1 ORDER BY id ASC"
        ))
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_job_row).collect()
    }

    pub async fn list_failed_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'failed' ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_job_row).collect()
    }

    /// Puts a dead-lettered job, and the chain steps cancelled behind it, back in the queue.
    /// Returns false when `job_id` is not a failed job.
    pub async fn retry_failed_job(&self, job_id: i64, now: i64) -> Result<bool> {
        let mut transaction = self.pool.begin().await?;

        let chain_id = sqlx::query_scalar::<_, String>(
            "SELECT chain_id FROM jobs WHERE id = ?1 AND status = 'failed'",
        )
        .bind(job_id)
        .fetch_optional(&mut *transaction)
        .await?;

        let Some(chain_id) = chain_id else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE jobs SET status = 'pending', attempts = 0, run_at = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(job_id)
        .bind(now)
        .execute(&mut *transaction)
        .await?;

        sqlx::query(
            "UPDATE jobs SET status = 'pending', attempts = 0, run_at = ?3, updated_at = CURRENT_TIMESTAMP WHERE chain_id = ?1 AND id > ?2 AND status = 'cancelled'",
        )
        .bind(&chain_id)
        .bind(job_id)
        .bind(now)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        Ok(true)
    }
}
