use anyhow::{anyhow, Result};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::{info, warn};

use crate::db::MysqlResources;
use crate::provisioning::NewMysqlUser;

use super::env_file::rewrite_database_credentials;
use super::{ignore_missing, TaskContext};

pub const DATABASE_PASSWORD_LENGTH: usize = 20;

/// `org/repo` and 42 become `org_repo_42`.
#[must_use]
pub fn database_name(repository: &str, pull_request_number: i64) -> String {
    format!("{}_{pull_request_number}", repository.replace('/', "_"))
}

#[must_use]
pub fn generate_database_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DATABASE_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

pub(super) async fn setup_database(context: &TaskContext<'_>) -> Result<()> {
    let branch = context.branch;
    let site_id = branch
        .site_id
        .ok_or_else(|| anyhow!("branch {} has no site yet", branch.id))?;
    let name = database_name(&context.project.repository, branch.pull_request_number);

    let resources = match (
        branch.mysql_database_id,
        branch.mysql_user_id,
        branch.mysql_password.as_deref(),
    ) {
        (Some(database_id), Some(user_id), Some(password)) => {
            info!(branch_id = %branch.id, database_id, user_id, "database already provisioned");
            MysqlResources {
                database_id,
                user_id,
                password: password.to_string(),
            }
        }
        _ => provision_database(context, &name).await?,
    };

    let environment = context
        .api
        .environment_file(context.project.server_id, site_id)
        .await?;
    let rewritten = rewrite_database_credentials(&environment, &name, &resources.password);
    if rewritten.is_empty() {
        warn!(branch_id = %branch.id, site_id, "environment file is empty; leaving it untouched");
        return Ok(());
    }

    context
        .api
        .update_environment_file(context.project.server_id, site_id, &rewritten)
        .await?;

    Ok(())
}

async fn provision_database(context: &TaskContext<'_>, name: &str) -> Result<MysqlResources> {
    let server_id = context.project.server_id;
    let branch_id = &context.branch.id;

    let existing = context
        .api
        .list_mysql_databases(server_id)
        .await?
        .into_iter()
        .find(|database| database.name == name);
    let database = match existing {
        Some(database) => {
            info!(%branch_id, database_id = database.id, "adopting existing database");
            database
        }
        None => context.api.create_mysql_database(server_id, name).await?,
    };

    // The password of a user left behind by an interrupted attempt is unknown.
    let orphans = context
        .api
        .list_mysql_users(server_id)
        .await?
        .into_iter()
        .filter(|user| user.name == name);
    for orphan in orphans {
        warn!(%branch_id, user_id = orphan.id, "replacing database user with unknown password");
        ignore_missing(context.api.delete_mysql_user(server_id, orphan.id).await)?;
    }

    let password = generate_database_password();
    let user = context
        .api
        .create_mysql_user(
            server_id,
            &NewMysqlUser {
                name: name.to_string(),
                password: password.clone(),
                databases: vec![database.id],
            },
        )
        .await?;

    let resources = MysqlResources {
        database_id: database.id,
        user_id: user.id,
        password,
    };
    context
        .db
        .set_branch_mysql_resources(branch_id, &resources)
        .await?;
    info!(%branch_id, database_id = database.id, user_id = user.id, "database provisioned");

    Ok(resources)
}
