use anyhow::Result;

use crate::config::SiteSettings;
use crate::db::{BranchRecord, DbClient, ProjectRecord};
use crate::provisioning::{ProvisioningApi, ProvisioningError};
use crate::queue::TaskKind;

mod create_site;
mod deploy_script;
mod env_file;
mod redeploy;
mod setup_database;
mod strip_initial_deployment;
mod teardown_site;

pub use create_site::site_domain;
pub use deploy_script::{render_deployment_script, strip_initial_deployment_block};
pub use env_file::rewrite_database_credentials;
pub use setup_database::{database_name, generate_database_password, DATABASE_PASSWORD_LENGTH};

/// Everything one job needs: the branch snapshot loaded when the job was claimed, its project,
/// and an API client already bound to the project owner's token.
pub struct TaskContext<'a> {
    pub db: &'a DbClient,
    pub api: &'a dyn ProvisioningApi,
    pub project: &'a ProjectRecord,
    pub branch: &'a BranchRecord,
    pub site_settings: &'a SiteSettings,
}

/// Runs a single task. Every task is written to be re-run after a partial failure.
///
/// # Errors
/// Returns an error if a provisioning API call or a store update fails.
pub async fn run_task(kind: TaskKind, context: &TaskContext<'_>) -> Result<()> {
    match kind {
        TaskKind::CreateSite => create_site::create_site(context).await,
        TaskKind::SetupDatabase => setup_database::setup_database(context).await,
        TaskKind::Redeploy => redeploy::redeploy(context).await,
        TaskKind::StripInitialDeployment => {
            strip_initial_deployment::strip_initial_deployment(context).await
        }
        TaskKind::TeardownSite => teardown_site::teardown_site(context).await,
    }
}

/// Treats "already gone" as success for deletions.
fn ignore_missing(result: Result<(), ProvisioningError>) -> Result<(), ProvisioningError> {
    match result {
        Err(error) if error.is_not_found() => {
            tracing::warn!(%error, "resource already absent");
            Ok(())
        }
        other => other,
    }
}
