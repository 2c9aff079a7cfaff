use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Error};

use crate::config::QueueSettings;

/// Unit of provisioning work stored in the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    CreateSite,
    SetupDatabase,
    Redeploy,
    StripInitialDeployment,
    TeardownSite,
}

impl TaskKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateSite => "create_site",
            Self::SetupDatabase => "setup_database",
            Self::Redeploy => "redeploy",
            Self::StripInitialDeployment => "strip_initial_deployment",
            Self::TeardownSite => "teardown_site",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create_site" => Ok(Self::CreateSite),
            "setup_database" => Ok(Self::SetupDatabase),
            "redeploy" => Ok(Self::Redeploy),
            "strip_initial_deployment" => Ok(Self::StripInitialDeployment),
            "teardown_site" => Ok(Self::TeardownSite),
            other => Err(anyhow!("unknown task kind: {other}")),
        }
    }
}

/// The first deploy has to run before the initial-only block is stripped.
pub const PROVISIONING_CHAIN: [TaskKind; 4] = [
    TaskKind::CreateSite,
    TaskKind::SetupDatabase,
    TaskKind::Redeploy,
    TaskKind::StripInitialDeployment,
];

pub const REDEPLOY_CHAIN: [TaskKind; 1] = [TaskKind::Redeploy];

pub const TEARDOWN_CHAIN: [TaskKind; 1] = [TaskKind::TeardownSite];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_base: Duration::from_secs(settings.backoff_base_seconds),
            backoff_max: Duration::from_secs(settings.backoff_max_seconds),
        }
    }

    /// Whether a job that has already been attempted `attempts` times may run again.
    #[must_use]
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Exponential backoff: `base * 2^(attempts - 1)`, capped at `backoff_max`.
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let multiplier = 1_u32 << exponent;
        self.backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { run_at: i64 },
    DeadLettered,
    /// The lease expired and the job was handed to another worker; nothing was recorded.
    LeaseLost,
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| i64::try_from(duration.as_secs()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(60),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = policy();
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(2), Duration::from_secs(20));
        assert_eq!(policy.delay_after(3), Duration::from_secs(40));
        assert_eq!(policy.delay_after(4), Duration::from_secs(60));
        assert_eq!(policy.delay_after(40), Duration::from_secs(60));
    }

    #[test]
    fn retries_are_bounded_by_max_attempts() {
        let policy = policy();
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }

    #[test]
    fn task_kind_parses_its_own_name() {
        for kind in PROVISIONING_CHAIN.iter().chain(TEARDOWN_CHAIN.iter()) {
            assert_eq!(kind.as_str().parse::<TaskKind>().expect("parse"), *kind);
        }
        assert!("reticulate".parse::<TaskKind>().is_err());
    }

    #[test]
    fn provisioning_chain_deploys_before_stripping_initial_block() {
        let deploy = PROVISIONING_CHAIN
            .iter()
            .position(|kind| *kind == TaskKind::Redeploy)
            .expect("deploy step");
        let strip = PROVISIONING_CHAIN
            .iter()
            .position(|kind| *kind == TaskKind::StripInitialDeployment)
            .expect("strip step");
        assert_eq!(PROVISIONING_CHAIN[0], TaskKind::CreateSite);
        assert_eq!(PROVISIONING_CHAIN[1], TaskKind::SetupDatabase);
        assert!(deploy < strip);
    }
}
