use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub id: String,
    pub user_id: String,
    pub repository: String,
    pub webhook_secret: String,
    pub server_id: i64,
    pub site_url_pattern: String,
    pub deployment_script: String,
    pub initial_deployment_script: String,
}

#[derive(Clone)]
pub struct ProjectRecord {
    pub id: String,
    pub user_id: String,
    pub repository: String,
    pub webhook_secret: String,
    pub server_id: i64,
    pub site_url_pattern: String,
    pub deployment_script: String,
    pub initial_deployment_script: String,
    pub deleted_at: Option<String>,
}

impl fmt::Debug for ProjectRecord {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProjectRecord")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("repository", &self.repository)
            .field("webhook_secret", &"***")
            .field("server_id", &self.server_id)
            .field("site_url_pattern", &self.site_url_pattern)
            .field("deleted_at", &self.deleted_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of registering a project under a repository identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectUpsert {
    Created,
    Restored,
}

/// Lifecycle of one pull request's preview environment.
///
/// A missing branch row is treated as `Unprovisioned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Unprovisioned,
    Provisioning,
    Live,
    Removed,
}

impl BranchState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Provisioning => "provisioning",
            Self::Live => "live",
            Self::Removed => "removed",
        }
    }
}

impl FromStr for BranchState {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unprovisioned" => Ok(Self::Unprovisioned),
            "provisioning" => Ok(Self::Provisioning),
            "live" => Ok(Self::Live),
            "removed" => Ok(Self::Removed),
            other => Err(anyhow!("unknown branch state: {other}")),
        }
    }
}

#[derive(Clone)]
pub struct BranchRecord {
    pub id: String,
    pub project_id: String,
    pub pull_request_number: i64,
    pub head_ref: Option<String>,
    pub state: BranchState,
    pub site_id: Option<i64>,
    pub mysql_user_id: Option<i64>,
    pub mysql_database_id: Option<i64>,
    pub mysql_password: Option<String>,
}

impl fmt::Debug for BranchRecord {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BranchRecord")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("pull_request_number", &self.pull_request_number)
            .field("head_ref", &self.head_ref)
            .field("state", &self.state)
            .field("site_id", &self.site_id)
            .field("mysql_user_id", &self.mysql_user_id)
            .field("mysql_database_id", &self.mysql_database_id)
            .field("mysql_password", &self.mysql_password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Database credentials recorded together, so the user/database pairing invariant holds.
#[derive(Debug, Clone)]
pub struct MysqlResources {
    pub database_id: i64,
    pub user_id: i64,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(anyhow!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub branch_id: String,
    pub chain_id: String,
    pub position: i64,
    pub kind: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub run_at: i64,
    pub last_error: Option<String>,
    /// Set while the job is `running`; only the holder may record its outcome.
    pub lease_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookDelivery {
    pub delivery_id: String,
    pub event_type: String,
    pub project_id: String,
    pub pull_request_number: i64,
    pub action: String,
}
