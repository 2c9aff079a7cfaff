use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "/etc/preview/config.json";

const DEFAULT_DB_PATH: &str = "/var/lib/preview/preview.db";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_API_BASE_URL: &str = "https://forge.laravel.com/api/v1";
const DEFAULT_PROJECT_TYPE: &str = "php";
const DEFAULT_SITE_DIRECTORY: &str = "/public";
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_BASE_SECONDS: u64 = 10;
const DEFAULT_BACKOFF_MAX_SECONDS: u64 = 600;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_LEASE_TIMEOUT_SECONDS: u64 = 900;
const DEFAULT_WORKER_COUNT: usize = 4;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub database_path: Option<String>,
    pub bind_address: Option<String>,
    pub provisioning: ProvisioningConfig,
    pub queue: QueueConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub api_base_url: Option<String>,
    pub project_type: Option<String>,
    pub directory: Option<String>,
    pub php_version: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: Option<u32>,
    pub backoff_base_seconds: Option<u64>,
    pub backoff_max_seconds: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub lease_timeout_seconds: Option<u64>,
    pub worker_count: Option<usize>,
}

/// Site defaults applied to every preview site created on the provisioning API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteSettings {
    pub project_type: String,
    pub directory: String,
    pub php_version: Option<String>,
}

/// Queue tunables with defaults filled in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub poll_interval_ms: u64,
    pub lease_timeout_seconds: u64,
    pub worker_count: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueConfig::default().settings()
    }
}

impl QueueConfig {
    #[must_use]
    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            backoff_base_seconds: self
                .backoff_base_seconds
                .unwrap_or(DEFAULT_BACKOFF_BASE_SECONDS),
            backoff_max_seconds: self
                .backoff_max_seconds
                .unwrap_or(DEFAULT_BACKOFF_MAX_SECONDS),
            poll_interval_ms: self
                .poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                .max(10),
            lease_timeout_seconds: self
                .lease_timeout_seconds
                .unwrap_or(DEFAULT_LEASE_TIMEOUT_SECONDS),
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT).max(1),
        }
    }
}

impl PreviewConfig {
    /// Reads the JSON config at `PREVIEW_CONFIG_PATH` (or the default path).
    ///
    /// # Errors
    ///
    /// This function will return an error if the config file is located but JSON contents cannot be parsed
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PREVIEW_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let path = Path::new(&config_path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {config_path}"))?;

        let config = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("Failed to parse config JSON: {config_path}"))?;

        Ok(config)
    }

    #[must_use]
    pub fn database_path(&self) -> String {
        self.database_path
            .clone()
            .or_else(|| std::env::var("PREVIEW_DB_PATH").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        self.bind_address
            .clone()
            .or_else(|| std::env::var("PREVIEW_BIND_ADDRESS").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
    }

    #[must_use]
    pub fn api_base_url(&self) -> String {
        self.provisioning
            .api_base_url
            .clone()
            .or_else(|| std::env::var("PREVIEW_API_BASE_URL").ok())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    #[must_use]
    pub fn site_settings(&self) -> SiteSettings {
        SiteSettings {
            project_type: self
                .provisioning
                .project_type
                .as_deref()
                .unwrap_or(DEFAULT_PROJECT_TYPE)
                .trim()
                .to_string(),
            directory: self
                .provisioning
                .directory
                .as_deref()
                .unwrap_or(DEFAULT_SITE_DIRECTORY)
                .trim()
                .to_string(),
            php_version: self
                .provisioning
                .php_version
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn queue_settings(&self) -> QueueSettings {
        self.queue.settings()
    }

    /// Per-request timeout for provisioning API calls, capped at a quarter of the job lease.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        let lease_cap = (self.queue_settings().lease_timeout_seconds / 4).max(1);
        let seconds = self
            .provisioning
            .request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
            .clamp(1, lease_cap);

        Duration::from_secs(seconds)
    }
}
