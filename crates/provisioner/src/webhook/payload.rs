use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a valid pull request event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload field {0} is empty")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    Other(String),
}

impl PullRequestAction {
    #[must_use]
    pub fn parse(action: &str) -> Self {
        match action {
            "opened" => Self::Opened,
            "reopened" => Self::Reopened,
            "synchronize" => Self::Synchronize,
            "closed" => Self::Closed,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Opened => "opened",
            Self::Reopened => "reopened",
            Self::Synchronize => "synchronize",
            Self::Closed => "closed",
            Self::Other(other) => other,
        }
    }
}

/// The parts of a pull request webhook the provisioner acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub repository: String,
    pub number: i64,
    pub action: PullRequestAction,
    pub head_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    repository: RepositoryPayload,
    pull_request: PullRequestFields,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFields {
    number: i64,
    #[serde(default)]
    head: Option<HeadPayload>,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    #[serde(default, rename = "ref")]
    ref_name: Option<String>,
}

/// Requires `repository.full_name`, `pull_request.number` and `action`; everything else in the
/// body is ignored.
///
/// # Errors
/// Returns an error if the body is not JSON or a required field is missing, mistyped or empty.
pub fn parse_pull_request_event(body: &[u8]) -> Result<PullRequestEvent, PayloadError> {
    let payload: PullRequestPayload = serde_json::from_slice(body)?;

    let repository = payload.repository.full_name.trim();
    if repository.is_empty() {
        return Err(PayloadError::InvalidField("repository.full_name"));
    }

    let action = payload.action.trim();
    if action.is_empty() {
        return Err(PayloadError::InvalidField("action"));
    }

    let head_ref = payload
        .pull_request
        .head
        .and_then(|head| head.ref_name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    Ok(PullRequestEvent {
        repository: repository.to_string(),
        number: payload.pull_request.number,
        action: PullRequestAction::parse(action),
        head_ref,
    })
}
