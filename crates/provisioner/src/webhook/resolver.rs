use anyhow::Result;

use crate::db::{BranchRecord, DbClient, ProjectRecord};

use super::payload::{PullRequestAction, PullRequestEvent};

/// Active project tracking `repository`. Soft-deleted projects do not resolve.
///
/// # Errors
/// Returns an error if the lookup fails.
pub async fn resolve_project(db: &DbClient, repository: &str) -> Result<Option<ProjectRecord>> {
    db.find_active_project_by_repository(repository).await
}

/// Branch for the event's pull request. Opening or reopening creates it when missing; every
/// other action only looks it up.
///
/// # Errors
/// Returns an error if the lookup or insert fails.
pub async fn resolve_branch(
    db: &DbClient,
    project: &ProjectRecord,
    event: &PullRequestEvent,
) -> Result<Option<BranchRecord>> {
    match event.action {
        PullRequestAction::Opened | PullRequestAction::Reopened => db
            .find_or_create_branch(&project.id, event.number, event.head_ref.as_deref())
            .await
            .map(Some),
        _ => db.find_branch(&project.id, event.number).await,
    }
}
