use anyhow::Result;
use uuid::Uuid;

use crate::queue::TaskKind;

use super::{BranchRecord, BranchState, DbClient, MysqlResources};

type BranchRow = (
    String,
    String,
    i64,
    Option<String>,
    String,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<String>,
);

const BRANCH_COLUMNS: &str = "id, project_id, pull_request_number, head_ref, state, site_id, mysql_user_id, mysql_database_id, mysql_password";

fn map_branch_row(row: BranchRow) -> Result<BranchRecord> {
    let (
        id,
        project_id,
        pull_request_number,
        head_ref,
        state,
        site_id,
        mysql_user_id,
        mysql_database_id,
        mysql_password,
    ) = row;

    Ok(BranchRecord {
        id,
        project_id,
        pull_request_number,
        head_ref,
        state: state.parse()?,
        site_id,
        mysql_user_id,
        mysql_database_id,
        mysql_password,
    })
}

#[allow(clippy::missing_errors_doc)]
impl DbClient {
    pub async fn find_branch(
        &self,
        project_id: &str,
        pull_request_number: i64,
    ) -> Result<Option<BranchRecord>> {
        let row = sqlx::query_as::<_, BranchRow>(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE project_id = ?1 AND pull_request_number = ?2"
        ))
        .bind(project_id)
        .bind(pull_request_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_branch_row).transpose()
    }

    pub async fn get_branch_by_id(&self, branch_id: &str) -> Result<Option<BranchRecord>> {
        let row = sqlx::query_as::<_, BranchRow>(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1"
        ))
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_branch_row).transpose()
    }

    /// Returns the branch for (project, pull request), inserting an unprovisioned row first when
    /// none exists. Concurrent callers converge on the same row through the unique key.
    pub async fn find_or_create_branch(
        &self,
        project_id: &str,
        pull_request_number: i64,
        head_ref: Option<&str>,
    ) -> Result<BranchRecord> {
        sqlx::query(
            "INSERT INTO branches (id, project_id, pull_request_number, head_ref, state) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(project_id, pull_request_number) DO UPDATE SET
              head_ref = COALESCE(excluded.head_ref, branches.head_ref),
              updated_at = CURRENT_TIMESTAMP",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(pull_request_number)
        .bind(head_ref)
        .bind(BranchState::Unprovisioned.as_str())
        .execute(&self.pool)
        .await?;

        self.find_branch(project_id, pull_request_number)
            .await?
            .ok_or_else(|| anyhow::anyhow!("branch row vanished after upsert"))
    }

    pub async fn list_branches_for_project(&self, project_id: &str) -> Result<Vec<BranchRecord>> {
        let rows = sqlx::query_as::<_, BranchRow>(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE project_id = ?1 ORDER BY pull_request_number ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_branch_row).collect()
    }

    /// Moves the branch to `next_state` (when given) and enqueues `chain` as one ordered unit,
    /// atomically. Returns the chain id when jobs were enqueued.
    pub async fn transition_branch(
        &self,
        branch_id: &str,
        next_state: Option<BranchState>,
        chain: &[TaskKind],
        now: i64,
    ) -> Result<Option<String>> {
        let mut transaction = self.pool.begin().await?;

        if let Some(state) = next_state {
            sqlx::query(
                "UPDATE branches SET state = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            )
            .bind(branch_id)
            .bind(state.as_str())
            .execute(&mut *transaction)
            .await?;
        }

        let chain_id = if chain.is_empty() {
            None
        } else {
            let chain_id = Uuid::new_v4().to_string();
            for (position, kind) in (0_i64..).zip(chain.iter()) {
                sqlx::query(
                    "INSERT INTO jobs (branch_id, chain_id, position, kind, status, run_at) VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
                )
                .bind(branch_id)
                .bind(&chain_id)
                .bind(position)
                .bind(kind.as_str())
                .bind(now)
                .execute(&mut *transaction)
                .await?;
            }
            Some(chain_id)
        };

        transaction.commit().await?;
        Ok(chain_id)
    }

    pub async fn set_branch_site_id(&self, branch_id: &str, site_id: Option<i64>) -> Result<()> {
        sqlx::query(
            "UPDATE branches SET site_id = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(branch_id)
        .bind(site_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_branch_mysql_resources(
        &self,
        branch_id: &str,
        resources: &MysqlResources,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE branches SET mysql_database_id = ?2, mysql_user_id = ?3, mysql_password = ?4, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(branch_id)
        .bind(resources.database_id)
        .bind(resources.user_id)
        .bind(&resources.password)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Forgets every external identifier once the remote resources are gone.
    pub async fn clear_branch_resources(&self, branch_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE branches SET site_id = NULL, mysql_user_id = NULL, mysql_database_id = NULL, mysql_password = NULL, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(branch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns whether the branch moved from provisioning to live.
    pub async fn mark_branch_live(&self, branch_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE branches SET state = 'live', updated_at = CURRENT_TIMESTAMP WHERE id = ?1 AND state = 'provisioning'",
        )
        .bind(branch_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
