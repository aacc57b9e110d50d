use gitlab_artifact_deployer::config::DeployerConfig;
use gitlab_artifact_deployer::error::Result;
use gitlab_artifact_deployer::pipeline::{Pipeline, build_http_client};
use gitlab_artifact_deployer::queue::{DeployQueue, run_workers};
use gitlab_artifact_deployer::{AppState, api, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path = std::env::var("DEPLOYER_CONFIG").ok().map(PathBuf::from);
    let config = match DeployerConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = match logging::setup_logging(config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(config: DeployerConfig) -> Result<()> {
    let client = build_http_client(config.request_timeout())?;
    let pipeline = Arc::new(Pipeline::from_config(&config, client)?);

    let (queue, receiver) = DeployQueue::channel();
    let workers = tokio::spawn(run_workers(
        receiver,
        pipeline,
        config.max_concurrent_runs,
    ));

    let bind_address = config.bind_address.clone();
    info!(
        "Deploying artifacts from {} into '{}'",
        config.gitlab_host,
        config.destination_path.display()
    );
    let app = api::router(Arc::new(AppState::new(config, queue)));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Server is running at: http://{}", bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the router owned the last queue handle, so the workers drain and stop
    info!("Shutting down, finishing queued deployments");
    workers.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
