//! Operator commands behind the CLI: accounts, tracked repositories, dead-lettered jobs.

use anyhow::{bail, Context, Result};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use uuid::Uuid;

use crate::db::{DbClient, JobRecord, NewProject, NewUser, ProjectRecord, ProjectUpsert};
use crate::queue::unix_now;

const WEBHOOK_SECRET_LENGTH: usize = 40;

#[derive(Debug, Clone)]
pub struct ProjectRegistration {
    pub username: String,
    pub repository: String,
    pub webhook_secret: Option<String>,
    pub server_id: i64,
    pub site_url_pattern: String,
    pub deployment_script: String,
    pub initial_deployment_script: String,
}

#[derive(Debug, Clone)]
pub struct RegisteredProject {
    pub outcome: ProjectUpsert,
    pub project_id: String,
    pub webhook_secret: String,
}

/// # Errors
/// Returns an error if the username is empty, already taken, or the insert fails.
pub async fn add_user(db: &DbClient, username: &str, api_token: &str) -> Result<String> {
    let username = username.trim();
    let api_token = api_token.trim();
    if username.is_empty() || api_token.is_empty() {
        bail!("username and API token are required");
    }

    if db.find_user_by_username(username).await?.is_some() {
        bail!("user {username} already exists");
    }

    let id = Uuid::new_v4().to_string();
    db.insert_user(&NewUser {
        id: id.clone(),
        username: username.to_string(),
        api_token: api_token.to_string(),
    })
    .await?;

    Ok(id)
}

/// Starts tracking a repository, restoring a previously removed project for it when one exists.
/// A webhook secret is generated when none is given.
///
/// # Errors
/// Returns an error if the input is invalid, the user is unknown, the repository is already
/// tracked, or the write fails.
pub async fn add_project(
    db: &DbClient,
    registration: ProjectRegistration,
) -> Result<RegisteredProject> {
    let repository = registration.repository.trim();
    if !is_repository_identifier(repository) {
        bail!("repository must look like owner/name, got {repository:?}");
    }

    let site_url_pattern = registration.site_url_pattern.trim();
    if site_url_pattern.is_empty() {
        bail!("site URL pattern is required");
    }

    let user = db
        .find_user_by_username(registration.username.trim())
        .await?
        .with_context(|| format!("unknown user {}", registration.username.trim()))?;

    let webhook_secret = registration
        .webhook_secret
        .map(|secret| secret.trim().to_string())
        .filter(|secret| !secret.is_empty())
        .unwrap_or_else(generate_webhook_secret);

    let (outcome, project_id) = db
        .create_or_restore_project(&NewProject {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            repository: repository.to_string(),
            webhook_secret: webhook_secret.clone(),
            server_id: registration.server_id,
            site_url_pattern: site_url_pattern.to_string(),
            deployment_script: registration.deployment_script,
            initial_deployment_script: registration.initial_deployment_script,
        })
        .await?;

    Ok(RegisteredProject {
        outcome,
        project_id,
        webhook_secret,
    })
}

/// # Errors
/// Returns an error if no active project tracks the repository or the update fails.
pub async fn remove_project(db: &DbClient, repository: &str) -> Result<()> {
    if !db.soft_delete_project(repository.trim()).await? {
        bail!("repository {} is not tracked", repository.trim());
    }

    Ok(())
}

/// # Errors
/// Returns an error if the query fails.
pub async fn list_projects(db: &DbClient) -> Result<Vec<ProjectRecord>> {
    db.list_active_projects().await
}

/// # Errors
/// Returns an error if the query fails.
pub async fn failed_jobs(db: &DbClient) -> Result<Vec<JobRecord>> {
    db.list_failed_jobs().await
}

/// Requeues a dead-lettered job together with the chain steps cancelled behind it.
///
/// # Errors
/// Returns an error if `job_id` is not a failed job or the update fails.
pub async fn retry_job(db: &DbClient, job_id: i64) -> Result<()> {
    if !db.retry_failed_job(job_id, unix_now()).await? {
        bail!("job {job_id} is not a failed job");
    }

    Ok(())
}

fn is_repository_identifier(value: &str) -> bool {
    let mut parts = value.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    ) && !value.chars().any(char::is_whitespace)
}

fn generate_webhook_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(WEBHOOK_SECRET_LENGTH)
        .map(char::from)
        .collect()
}
