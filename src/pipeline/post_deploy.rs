//! Post-deploy shell command

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DeployerConfig;
use crate::error::{DeployError, Result};
use crate::job::DeployRun;
use crate::webhook::ArtifactLocator;

/// How long output readers may keep going once the command has exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PostDeployCommand {
    command: String,
    working_dir: PathBuf,
}

impl PostDeployCommand {
    /// None when the command is empty, which skips the stage.
    pub fn new(command: &str, working_dir: impl Into<PathBuf>) -> Option<Self> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        Some(Self {
            command: command.to_string(),
            working_dir: working_dir.into(),
        })
    }

    pub fn from_config(config: &DeployerConfig) -> Option<Self> {
        Self::new(&config.post_deploy_command, config.post_deploy_workdir())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run the command through the shell and wait for it to exit.
    /// Output lines are logged as they arrive, stdout at INFO and
    /// stderr at WARN. Details of the run are exported to the command
    /// as `DEPLOY_*` environment variables.
    pub async fn run(&self, run: &DeployRun) -> Result<()> {
        info!(
            run = %run.id,
            "Running (cwd = '{}'): {}",
            self.working_dir.display(),
            self.command
        );

        let mut child = shell(&self.command)
            .current_dir(&self.working_dir)
            .envs(run_env(run))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(DeployError::CommandSpawnFailed)?;

        let readers = [
            tokio::spawn(forward_lines(
                child.stdout.take(),
                run.id.clone(),
                OutputStream::Stdout,
            )),
            tokio::spawn(forward_lines(
                child.stderr.take(),
                run.id.clone(),
                OutputStream::Stderr,
            )),
        ];

        // The exit status decides the outcome. A process the command left in
        // the background may hold the pipes open long after that.
        let status = child.wait().await;
        for mut reader in readers {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                debug!(run = %run.id, "Output still open after exit, detaching");
                reader.abort();
            }
        }
        let status = status.map_err(DeployError::IoError)?;

        if status.success() {
            info!(run = %run.id, "Post-deploy command finished");
            Ok(())
        } else {
            Err(DeployError::CommandFailed(format!(
                "'{}' exited with {}",
                self.command, status
            )))
        }
    }
}

fn run_env(run: &DeployRun) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("DEPLOY_RUN_ID", run.id.clone()),
        ("DEPLOY_PROJECT_ID", run.target.project_id.to_string()),
        ("DEPLOY_TRIGGERED_BY", run.triggered_by.clone()),
    ];
    match &run.target.locator {
        ArtifactLocator::JobId(job_id) => env.push(("DEPLOY_JOB_ID", job_id.to_string())),
        ArtifactLocator::JobName { branch, job } => {
            env.push(("DEPLOY_BRANCH", branch.clone()));
            env.push(("DEPLOY_JOB_NAME", job.clone()));
        }
    }
    if let Some(environment) = &run.environment {
        env.push(("DEPLOY_ENVIRONMENT", environment.clone()));
    }
    if let Some(sha) = &run.short_sha {
        env.push(("DEPLOY_SHORT_SHA", sha.clone()));
    }
    env
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn forward_lines<R>(reader: Option<R>, run_id: String, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match stream {
                OutputStream::Stdout => info!(run = %run_id, stream = "stdout", "{}", line),
                OutputStream::Stderr => warn!(run = %run_id, stream = "stderr", "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(run = %run_id, "Could not read post-deploy output: {}", e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
