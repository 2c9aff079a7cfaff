use anyhow::Result;
use tracing::{info, warn};

use super::TaskContext;

pub(super) async fn redeploy(context: &TaskContext<'_>) -> Result<()> {
    let Some(site_id) = context.branch.site_id else {
        warn!(branch_id = %context.branch.id, "no site recorded; nothing to deploy");
        return Ok(());
    };

    context
        .api
        .deploy_site(context.project.server_id, site_id)
        .await?;
    info!(branch_id = %context.branch.id, site_id, "deployment triggered");

    Ok(())
}
