mod config;
mod logging;
mod services;

use clap::Parser;
use config::ServerConfig;
use joblib::JobCoordinator;
use jobproto::remote_jobs_server::RemoteJobsServer;
use services::jobservice::RemoteJobsService;
use std::{future::Future, net::SocketAddr};
use tonic::transport::Server;
use tracing::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = ServerConfig::parse();
    logging::init_logging(&config.log_level)?;

    let supervisor = config.supervisor();
    info!(
        listen = %config.listen,
        subscriber_capacity = supervisor.broadcast.subscriber_capacity,
        overflow = %supervisor.broadcast.overflow,
        "starting jobserver"
    );

    let coordinator = JobCoordinator::new(supervisor);
    serve(config.listen, coordinator.clone(), shutdown_signal()).await?;

    info!(jobs = coordinator.len(), "shutting down, stopping remaining jobs");
    coordinator.shutdown().await;
    Ok(())
}

async fn serve(
    addr: SocketAddr,
    coordinator: JobCoordinator,
    shutdown: impl Future<Output = ()>,
) -> Result<(), tonic::transport::Error> {
    let job_service = RemoteJobsService::new(coordinator);
    info!("Listening on {}", addr);

    Server::builder()
        .add_service(RemoteJobsServer::new(job_service))
        .serve_with_shutdown(addr, shutdown)
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available; run until killed
        futures::future::pending::<()>().await;
    }
}
