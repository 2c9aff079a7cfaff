use anyhow::{bail, Result};

use super::{DbClient, NewProject, ProjectRecord, ProjectUpsert};

type ProjectRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<String>,
);

const PROJECT_COLUMNS: &str = "id, user_id, repository, webhook_secret, server_id, site_url_pattern, deployment_script, initial_deployment_script, deleted_at";

fn map_project_row(row: ProjectRow) -> ProjectRecord {
    let (
        id,
        user_id,
        repository,
        webhook_secret,
        server_id,
        site_url_pattern,
        deployment_script,
        initial_deployment_script,
        deleted_at,
    ) = row;

    ProjectRecord {
        id,
        user_id,
        repository,
        webhook_secret,
        server_id,
        site_url_pattern,
        deployment_script,
        initial_deployment_script,
        deleted_at,
    }
}

impl DbClient {
    /// Registers a repository. A soft-deleted project for the same repository is restored in
    /// place (same id, fields overwritten) rather than duplicated.
    ///
    /// Returns the id of the stored row.
    ///
    /// # Errors
    /// Returns an error if a non-deleted project already tracks the repository, or the
    /// write fails.
    pub async fn create_or_restore_project(
        &self,
        project: &NewProject,
    ) -> Result<(ProjectUpsert, String)> {
        let mut transaction = self.pool.begin().await?;

        let active = sqlx::query_scalar::<_, String>(
            "SELECT id FROM projects WHERE repository = ?1 AND deleted_at IS NULL",
        )
        .bind(&project.repository)
        .fetch_optional(&mut *transaction)
        .await?;

        if active.is_some() {
            bail!("repository {} is already tracked", project.repository);
        }

        let trashed = sqlx::query_scalar::<_, String>(
            "SELECT id FROM projects WHERE repository = ?1 AND deleted_at IS NOT NULL ORDER BY deleted_at DESC LIMIT 1",
        )
        .bind(&project.repository)
        .fetch_optional(&mut *transaction)
        .await?;

        let outcome = if let Some(existing_id) = trashed {
            sqlx::query(
                "UPDATE projects SET user_id = ?2, webhook_secret = ?3, server_id = ?4, site_url_pattern = ?5, deployment_script = ?6, initial_deployment_script = ?7, deleted_at = NULL, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            )
            .bind(&existing_id)
            .bind(&project.user_id)
            .bind(&project.webhook_secret)
            .bind(project.server_id)
            .bind(&project.site_url_pattern)
            .bind(&project.deployment_script)
            .bind(&project.initial_deployment_script)
            .execute(&mut *transaction)
            .await?;

            (ProjectUpsert::Restored, existing_id)
        } else {
            sqlx::query(
                "INSERT INTO projects (id, user_id, repository, webhook_secret, server_id, site_url_pattern, deployment_script, initial_deployment_script) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&project.id)
            .bind(&project.user_id)
            .bind(&project.repository)
            .bind(&project.webhook_secret)
            .bind(project.server_id)
            .bind(&project.site_url_pattern)
            .bind(&project.deployment_script)
            .bind(&project.initial_deployment_script)
            .execute(&mut *transaction)
            .await?;

            (ProjectUpsert::Created, project.id.clone())
        };

        transaction.commit().await?;
        Ok(outcome)
    }

    /// Soft-deletes the active project for `repository`. Returns whether a row was tombstoned.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn soft_delete_project(&self, repository: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE projects SET deleted_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP WHERE repository = ?1 AND deleted_at IS NULL",
        )
        .bind(repository)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Looks up the non-deleted project tracking `repository`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_active_project_by_repository(
        &self,
        repository: &str,
    ) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE repository = ?1 AND deleted_at IS NULL"
        ))
        .bind(repository)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(map_project_row))
    }

    /// Fetches a project by id, including soft-deleted ones; queued teardown work must still
    /// be able to reach its project.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_project_by_id(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(map_project_row))
    }

    /// Lists non-deleted projects by repository name.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_active_projects(&self) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE deleted_at IS NULL ORDER BY repository ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(map_project_row).collect())
    }
}
