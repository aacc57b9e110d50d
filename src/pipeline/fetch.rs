//! Artifact download from the GitLab jobs API

use reqwest::{Client, ClientBuilder, Url};
use std::fs::File;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::config::DeployerConfig;
use crate::error::{DeployError, Result};
use crate::webhook::{ArtifactLocator, FetchTarget};

const GITLAB_API_PREFIX: &str = "api/v4";
const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client shared by every pipeline run
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    let client = ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Downloaded artifact staged in a temporary file.
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedArtifact {
    file: NamedTempFile,
    size: u64,
}

impl StagedArtifact {
    /// Fresh read handle positioned at the start of the archive
    pub fn open(&self) -> Result<File> {
        Ok(self.file.reopen()?)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

pub struct ArtifactFetcher {
    client: Client,
    api_base: Url,
    access_token: Option<String>,
    grace_period: Duration,
}

impl ArtifactFetcher {
    pub fn new(
        client: Client,
        gitlab_host: &str,
        access_token: Option<String>,
        grace_period: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client,
            api_base: api_base_url(gitlab_host)?,
            access_token,
            grace_period,
        })
    }

    pub fn from_config(config: &DeployerConfig, client: Client) -> Result<Self> {
        Self::new(
            client,
            &config.gitlab_host,
            config.access_token().map(str::to_string),
            config.grace_period(),
        )
    }

    /// Download URL for the target's artifact archive
    pub fn artifact_url(&self, target: &FetchTarget) -> Result<Url> {
        let mut url = self.api_base.clone();
        let project_id = target.project_id.to_string();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DeployError::InvalidUrl(self.api_base.to_string()))?;
            segments.pop_if_empty().extend(["projects", project_id.as_str(), "jobs"]);
            match &target.locator {
                ArtifactLocator::JobId(job_id) => {
                    segments.extend([job_id.to_string().as_str(), "artifacts"]);
                }
                ArtifactLocator::JobName { branch, .. } => {
                    segments.extend(["artifacts", branch.as_str(), "download"]);
                }
            }
        }
        if let ArtifactLocator::JobName { job, .. } = &target.locator {
            url.query_pairs_mut().append_pair("job", job);
        }
        Ok(url)
    }

    /// Wait out the grace period, then download the artifact into a
    /// temporary file.
    pub async fn fetch(&self, target: &FetchTarget) -> Result<StagedArtifact> {
        // GitLab may still be publishing the artifact when the webhook fires
        tokio::time::sleep(self.grace_period).await;

        let url = self.artifact_url(target)?;
        debug!("Requesting artifact from {}", url);

        let mut request = self.client.get(url);
        if let Some(token) = &self.access_token {
            request = request.header(PRIVATE_TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::UpstreamStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let staged = tempfile::Builder::new()
            .prefix("artifact-")
            .suffix(".zip")
            .tempfile()?;
        let mut writer = tokio::fs::File::from_std(staged.as_file().try_clone()?);
        let mut size = 0u64;

        let mut body = std::pin::pin!(response.bytes_stream());
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        writer.flush().await?;

        info!("Downloaded artifact successfully, {} ({} bytes)", target, size);
        Ok(StagedArtifact { file: staged, size })
    }
}

/// `https://<host>/api/v4/`, or `<host>/api/v4/` when the host already
/// names a scheme.
fn api_base_url(gitlab_host: &str) -> Result<Url> {
    let host = gitlab_host.trim_end_matches('/');
    let raw = if host.contains("://") {
        format!("{}/{}/", host, GITLAB_API_PREFIX)
    } else {
        format!("https://{}/{}/", host, GITLAB_API_PREFIX)
    };
    Url::parse(&raw).map_err(|e| DeployError::InvalidUrl(format!("{}: {}", raw, e)))
}
