use anyhow::Result;
use tracing::info;

use super::{ignore_missing, TaskContext};

pub(super) async fn teardown_site(context: &TaskContext<'_>) -> Result<()> {
    let branch = context.branch;
    let server_id = context.project.server_id;

    if let Some(user_id) = branch.mysql_user_id {
        ignore_missing(context.api.delete_mysql_user(server_id, user_id).await)?;
    }

    if let Some(database_id) = branch.mysql_database_id {
        ignore_missing(context.api.delete_mysql_database(server_id, database_id).await)?;
    }

    if let Some(site_id) = branch.site_id {
        ignore_missing(context.api.delete_site(server_id, site_id).await)?;
    }

    context.db.clear_branch_resources(&branch.id).await?;
    info!(branch_id = %branch.id, "branch resources removed");

    Ok(())
}
