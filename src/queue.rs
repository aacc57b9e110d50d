//! Hand-off between the webhook handler and the pipeline workers

use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{DeployError, Result};
use crate::job::DeployRun;
use crate::pipeline::Pipeline;

/// Submission side of the deployment queue. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct DeployQueue {
    tx: mpsc::UnboundedSender<DeployRun>,
}

pub type DeployReceiver = mpsc::UnboundedReceiver<DeployRun>;

impl DeployQueue {
    pub fn channel() -> (Self, DeployReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a run without waiting for it
    pub fn submit(&self, run: DeployRun) -> Result<()> {
        self.tx.send(run).map_err(|_| DeployError::QueueClosed)
    }
}

/// Consume queued runs until every `DeployQueue` is dropped, running at most
/// `max_concurrent` of them at a time, or all of them at once when it is 0.
/// Returns once the queue is drained and every started run has finished.
pub async fn run_workers(mut rx: DeployReceiver, pipeline: Arc<Pipeline>, max_concurrent: usize) {
    let permits = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
    match max_concurrent {
        0 => info!("Deployment workers started, no concurrency limit"),
        n => info!("Deployment workers started, at most {} run(s) at a time", n),
    }
    let mut runs = JoinSet::new();

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(run) => {
                    let pipeline = Arc::clone(&pipeline);
                    let permits = permits.clone();
                    runs.spawn(async move {
                        let _permit = match permits {
                            Some(permits) => match permits.acquire_owned().await {
                                Ok(permit) => Some(permit),
                                Err(_) => return,
                            },
                            None => None,
                        };
                        let mut run = run;
                        let outcome = pipeline.run(&mut run).await;
                        outcome.log(&run);
                    });
                }
                None => break,
            },
            Some(finished) = runs.join_next(), if !runs.is_empty() => {
                if let Err(e) = finished {
                    error!("Deployment task panicked: {}", e);
                }
            }
        }
    }

    if !runs.is_empty() {
        info!("Waiting for {} deployment(s) to finish", runs.len());
    }
    while let Some(finished) = runs.join_next().await {
        if let Err(e) = finished {
            error!("Deployment task panicked: {}", e);
        }
    }
    info!("Deployment workers stopped");
}
