use anyhow::{anyhow, Result};
use tracing::info;

use super::deploy_script::strip_initial_deployment_block;
use super::TaskContext;

pub(super) async fn strip_initial_deployment(context: &TaskContext<'_>) -> Result<()> {
    let branch = context.branch;
    let server_id = context.project.server_id;
    let site_id = branch
        .site_id
        .ok_or_else(|| anyhow!("branch {} has no site yet", branch.id))?;

    let script = context.api.deployment_script(server_id, site_id).await?;
    let stripped = strip_initial_deployment_block(&script);
    if stripped != script {
        context
            .api
            .update_deployment_script(server_id, site_id, &stripped)
            .await?;
        info!(branch_id = %branch.id, site_id, "initial deployment commands removed");
    }

    if context.db.mark_branch_live(&branch.id).await? {
        info!(branch_id = %branch.id, "branch is live");
    }

    Ok(())
}
