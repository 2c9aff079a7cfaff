use crate::db::BranchState;
use crate::queue::{TaskKind, PROVISIONING_CHAIN, REDEPLOY_CHAIN, TEARDOWN_CHAIN};

use super::error::WebhookError;
use super::payload::PullRequestAction;

/// What an accepted event does to a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next_state: Option<BranchState>,
    pub chain: &'static [TaskKind],
}

impl Transition {
    const NONE: Self = Self {
        next_state: None,
        chain: &[],
    };

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.next_state.is_none() && self.chain.is_empty()
    }
}

/// Maps the branch's current state and the incoming action to a transition.
///
/// # Errors
/// Returns [`WebhookError::UnknownBranch`] when the action needs a provisioned branch and there
/// is none.
pub fn dispatch(
    current: BranchState,
    action: &PullRequestAction,
) -> Result<Transition, WebhookError> {
    use BranchState::{Live, Provisioning, Removed, Unprovisioned};

    let transition = match (current, action) {
        (_, PullRequestAction::Opened | PullRequestAction::Reopened) => Transition {
            next_state: Some(Provisioning),
            chain: &PROVISIONING_CHAIN,
        },
        (Provisioning | Live, PullRequestAction::Synchronize) => Transition {
            next_state: None,
            chain: &REDEPLOY_CHAIN,
        },
        (Provisioning | Live, PullRequestAction::Closed) => Transition {
            next_state: Some(Removed),
            chain: &TEARDOWN_CHAIN,
        },
        (Unprovisioned | Removed, PullRequestAction::Synchronize)
        | (Unprovisioned, PullRequestAction::Closed) => return Err(WebhookError::UnknownBranch),
        (Removed, PullRequestAction::Closed) | (_, PullRequestAction::Other(_)) => {
            Transition::NONE
        }
    };

    Ok(transition)
}
