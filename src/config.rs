//! Deployer configuration, loaded once at startup

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DeployError, Result};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_GITLAB_HOST: &str = "gitlab.com";
pub const DEFAULT_JOB_NAME: &str = "deploy";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_DESTINATION_PATH: &str = "dest";
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
/// 0 runs every queued deployment at once
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 0;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeployerConfig {
    /// Shared secret GitLab sends in `X-Gitlab-Token`
    pub secret_token: String,
    /// Replaces the project id from the payload when set and numeric
    pub project_id: Option<String>,
    pub use_job_name: bool,
    pub job_name: String,
    pub gitlab_host: String,
    pub access_token: Option<String>,
    pub branch: String,
    pub destination_path: PathBuf,
    pub post_deploy_command: String,
    /// Falls back to `destination_path` when unset
    pub post_deploy_workdir: Option<PathBuf>,
    pub bind_address: String,
    pub grace_period_secs: u64,
    pub request_timeout_secs: u64,
    /// Cap on pipeline runs in flight, 0 for no cap
    pub max_concurrent_runs: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            secret_token: String::new(),
            project_id: None,
            use_job_name: false,
            job_name: DEFAULT_JOB_NAME.to_string(),
            gitlab_host: DEFAULT_GITLAB_HOST.to_string(),
            access_token: None,
            branch: DEFAULT_BRANCH.to_string(),
            destination_path: PathBuf::from(DEFAULT_DESTINATION_PATH),
            post_deploy_command: String::new(),
            post_deploy_workdir: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            log_dir: None,
        }
    }
}

impl DeployerConfig {
    /// Load the configuration: optional TOML file, then environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            DeployError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: DeployerConfig = toml::from_str(&config_str)?;
        Ok(config)
    }

    /// Override fields with the variables returned by `lookup`.
    /// Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("GITLAB_SECRET_TOKEN") {
            self.secret_token = v;
        }
        if let Some(v) = var("PROJECT_ID") {
            self.project_id = Some(v);
        }
        if let Some(v) = var("USE_JOB_NAME") {
            self.use_job_name = parse_flag(&v);
        }
        if let Some(v) = var("JOB_NAME") {
            self.job_name = v;
        }
        if let Some(v) = var("GITLAB_HOSTNAME") {
            self.gitlab_host = v;
        }
        if let Some(v) = var("ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = var("REPO_BRANCH") {
            self.branch = v;
        }
        if let Some(v) = var("DESTINATION_PATH") {
            self.destination_path = PathBuf::from(v);
        }
        if let Some(v) = var("POST_DEPLOY_COMMAND") {
            self.post_deploy_command = v;
        }
        if let Some(v) = var("POST_DEPLOY_WORKDIR") {
            self.post_deploy_workdir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = var("GRACE_PERIOD_SECS") {
            self.grace_period_secs = parse_number("GRACE_PERIOD_SECS", &v)?;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("MAX_CONCURRENT_RUNS") {
            self.max_concurrent_runs = parse_number("MAX_CONCURRENT_RUNS", &v)?;
        }
        if let Some(v) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }

        Ok(())
    }

    /// Checks the settings the service cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.secret_token.is_empty() {
            return Err(DeployError::ConfigError(
                "GITLAB_SECRET_TOKEN is NOT set but is required!".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(DeployError::ConfigError(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Numeric project id override, if one is configured.
    /// A non-numeric value is ignored.
    pub fn project_id_override(&self) -> Option<u64> {
        self.project_id
            .as_deref()
            .and_then(|id| id.trim().parse().ok())
    }

    /// Access token, or None for anonymous downloads
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn post_deploy_workdir(&self) -> &Path {
        self.post_deploy_workdir
            .as_deref()
            .unwrap_or(&self.destination_path)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1"
    )
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        DeployError::ConfigError(format!("{} must be a number, got '{}'", key, value))
    })
}
