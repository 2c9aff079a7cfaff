//! Client side of the external server-management API that owns sites, databases and
//! database users on a provisioning server.
//!
//! Tasks talk to [`ProvisioningApi`] only. [`client::ForgeClient`] is the HTTP implementation;
//! a client is built per job from the owning user's token through [`ProvisioningApiFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
#[cfg(test)]
pub(crate) mod fake;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("{resource} was not found")]
    NotFound { resource: String },

    #[error("provisioning API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provisioning API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provisioning API returned an unexpected body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProvisioningError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type ApiResult<T> = Result<T, ProvisioningError>;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Site {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewSite {
    pub domain: String,
    pub project_type: String,
    pub directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub php_version: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RepositoryInstall {
    pub provider: String,
    pub repository: String,
    pub branch: String,
    pub composer: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MysqlDatabase {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MysqlUser {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct NewMysqlUser {
    pub name: String,
    pub password: String,
    pub databases: Vec<i64>,
}

impl std::fmt::Debug for NewMysqlUser {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NewMysqlUser")
            .field("name", &self.name)
            .field("password", &"***")
            .field("databases", &self.databases)
            .finish()
    }
}

/// Remote operations consumed by the provisioning tasks. All ids are the API's own.
#[allow(clippy::missing_errors_doc)]
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn list_sites(&self, server_id: i64) -> ApiResult<Vec<Site>>;
    async fn get_site(&self, server_id: i64, site_id: i64) -> ApiResult<Site>;
    async fn create_site(&self, server_id: i64, site: &NewSite) -> ApiResult<Site>;
    async fn delete_site(&self, server_id: i64, site_id: i64) -> ApiResult<()>;
    async fn install_repository(
        &self,
        server_id: i64,
        site_id: i64,
        repository: &RepositoryInstall,
    ) -> ApiResult<()>;

    async fn environment_file(&self, server_id: i64, site_id: i64) -> ApiResult<String>;
    async fn update_environment_file(
        &self,
        server_id: i64,
        site_id: i64,
        content: &str,
    ) -> ApiResult<()>;
    async fn deployment_script(&self, server_id: i64, site_id: i64) -> ApiResult<String>;
    async fn update_deployment_script(
        &self,
        server_id: i64,
        site_id: i64,
        content: &str,
    ) -> ApiResult<()>;
    async fn deploy_site(&self, server_id: i64, site_id: i64) -> ApiResult<()>;

    async fn list_mysql_databases(&self, server_id: i64) -> ApiResult<Vec<MysqlDatabase>>;
    async fn create_mysql_database(&self, server_id: i64, name: &str) -> ApiResult<MysqlDatabase>;
    async fn delete_mysql_database(&self, server_id: i64, database_id: i64) -> ApiResult<()>;
    async fn list_mysql_users(&self, server_id: i64) -> ApiResult<Vec<MysqlUser>>;
    async fn create_mysql_user(&self, server_id: i64, user: &NewMysqlUser)
        -> ApiResult<MysqlUser>;
    async fn delete_mysql_user(&self, server_id: i64, user_id: i64) -> ApiResult<()>;
}

/// Builds an API client bound to one account's token.
pub trait ProvisioningApiFactory: Send + Sync {
    fn client(&self, api_token: &str) -> Arc<dyn ProvisioningApi>;
}
