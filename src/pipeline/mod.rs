//! Deployment pipeline: fetch, extract, post-deploy

pub mod extract;
pub mod fetch;
pub mod post_deploy;

use reqwest::Client;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::DeployerConfig;
use crate::error::{DeployError, Result};
use crate::job::{DeployRun, RunOutcome, RunState};
pub use extract::extract_archive;
pub use fetch::{ArtifactFetcher, StagedArtifact, build_http_client};
pub use post_deploy::PostDeployCommand;

pub struct Pipeline {
    fetcher: ArtifactFetcher,
    destination: PathBuf,
    post_deploy: Option<PostDeployCommand>,
}

impl Pipeline {
    pub fn new(
        fetcher: ArtifactFetcher,
        destination: impl Into<PathBuf>,
        post_deploy: Option<PostDeployCommand>,
    ) -> Self {
        match &post_deploy {
            Some(command) => info!(
                "Post-deploy command (cwd = '{}'): {}",
                command.working_dir().display(),
                command.command()
            ),
            None => info!("No post-deploy command configured"),
        }
        Self {
            fetcher,
            destination: destination.into(),
            post_deploy,
        }
    }

    pub fn from_config(config: &DeployerConfig, client: Client) -> Result<Self> {
        Ok(Self::new(
            ArtifactFetcher::from_config(config, client)?,
            config.destination_path.clone(),
            PostDeployCommand::from_config(config),
        ))
    }

    /// Run every stage for one deployment. The first failing stage ends the
    /// run in `Failed`; later stages are skipped.
    pub async fn run(&self, run: &mut DeployRun) -> RunOutcome {
        info!(
            run = %run.id,
            "Starting deployment, {}, triggered by: {}",
            run.target,
            run.triggered_by
        );

        match self.execute(run).await {
            Ok(outcome) => {
                run.advance(RunState::Done);
                outcome
            }
            Err(error) => {
                let stage = run.state();
                run.advance(RunState::Failed);
                RunOutcome::Failed { stage, error }
            }
        }
    }

    async fn execute(&self, run: &mut DeployRun) -> Result<RunOutcome> {
        run.advance(RunState::Fetching);
        let staged = self.fetcher.fetch(&run.target).await?;
        debug!(
            run = %run.id,
            "Staged {} bytes at '{}'",
            staged.size(),
            staged.path().display()
        );

        run.advance(RunState::Extracting);
        let entries = self.extract(staged).await?;
        info!(
            run = %run.id,
            "Unzipping of artifact went successfully, {} entries into '{}'",
            entries,
            self.destination.display()
        );

        let ran_post_deploy = match &self.post_deploy {
            Some(command) => {
                run.advance(RunState::PostDeploy);
                command.run(run).await?;
                true
            }
            None => false,
        };

        Ok(RunOutcome::Deployed {
            entries,
            ran_post_deploy,
        })
    }

    /// Extract on the blocking pool. The staged file is dropped, and so
    /// deleted, when the closure returns.
    async fn extract(&self, staged: StagedArtifact) -> Result<usize> {
        let destination = self.destination.clone();
        tokio::task::spawn_blocking(move || {
            let archive = staged.open()?;
            extract_archive(archive, &destination)
        })
        .await
        .map_err(DeployError::TaskAborted)?
    }
}
