use anyhow::Result;
use tracing::{info, warn};

use crate::provisioning::{NewSite, RepositoryInstall, Site};

use super::deploy_script::render_deployment_script;
use super::TaskContext;

const REPOSITORY_PROVIDER: &str = "github";

/// Domain of a branch site: `*` in the project pattern becomes `pr-<number>`. A pattern without
/// a wildcard is treated as the parent domain.
#[must_use]
pub fn site_domain(site_url_pattern: &str, pull_request_number: i64) -> String {
    let pattern = site_url_pattern
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_ascii_lowercase();
    let label = format!("pr-{pull_request_number}");

    if pattern.contains('*') {
        pattern.replace('*', &label)
    } else {
        format!("{label}.{pattern}")
    }
}

pub(super) async fn create_site(context: &TaskContext<'_>) -> Result<()> {
    let server_id = context.project.server_id;
    let branch = context.branch;

    if let Some(site_id) = branch.site_id {
        match context.api.get_site(server_id, site_id).await {
            Ok(_) => {
                info!(branch_id = %branch.id, site_id, "site already provisioned");
                return Ok(());
            }
            Err(error) if error.is_not_found() => {
                warn!(branch_id = %branch.id, site_id, "recorded site is gone; provisioning a new one");
                context.db.set_branch_site_id(&branch.id, None).await?;
            }
            Err(error) => return Err(error.into()),
        }
    }

    let domain = site_domain(&context.project.site_url_pattern, branch.pull_request_number);

    let existing = context
        .api
        .list_sites(server_id)
        .await?
        .into_iter()
        .find(|site| site.name.eq_ignore_ascii_case(&domain));

    // An unrecorded site with this domain was created by an earlier attempt that failed before
    // saving its id, so it may still lack its repository and deploy script.
    if let Some(site) = existing {
        info!(branch_id = %branch.id, site_id = site.id, %domain, "adopting existing site");
        context.db.set_branch_site_id(&branch.id, Some(site.id)).await?;
        return prepare_site(context, &site).await;
    }

    let request = NewSite {
        domain: domain.clone(),
        project_type: context.site_settings.project_type.clone(),
        directory: context.site_settings.directory.clone(),
        php_version: context.site_settings.php_version.clone(),
    };
    let site = context.api.create_site(server_id, &request).await?;
    context.db.set_branch_site_id(&branch.id, Some(site.id)).await?;
    info!(branch_id = %branch.id, site_id = site.id, %domain, "site created");

    prepare_site(context, &site).await
}

async fn prepare_site(context: &TaskContext<'_>, site: &Site) -> Result<()> {
    let server_id = context.project.server_id;

    match context.branch.head_ref.as_deref() {
        Some(head_ref) => {
            let install = RepositoryInstall {
                provider: REPOSITORY_PROVIDER.to_string(),
                repository: context.project.repository.clone(),
                branch: head_ref.to_string(),
                composer: false,
            };
            context
                .api
                .install_repository(server_id, site.id, &install)
                .await?;
        }
        None => warn!(
            branch_id = %context.branch.id,
            site_id = site.id,
            "no head ref known; repository not installed"
        ),
    }

    let script = render_deployment_script(
        &context.project.initial_deployment_script,
        &context.project.deployment_script,
    );
    context
        .api
        .update_deployment_script(server_id, site.id, &script)
        .await?;

    Ok(())
}
