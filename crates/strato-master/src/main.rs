mod args;
mod consumer;
mod control_api;
mod dispatcher;
mod intake;
mod placer;
mod queue;
mod registry;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use strato_common::ModelCatalog;

use crate::args::Args;
use crate::dispatcher::Dispatcher;
use crate::placer::Placer;
use crate::queue::WaitQueue;
use crate::registry::NodeRegistry;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("strato-master starting...");

    let registry = NodeRegistry::new(
        Duration::from_secs(args.heartbeat_interval_secs),
        Duration::from_secs(args.node_timeout_secs),
    )?;
    let queue = Arc::new(WaitQueue::new(args.queue_capacity));
    let catalog = ModelCatalog::with_defaults();
    let cancel = CancellationToken::new();

    let sweeper = tokio::spawn(registry.clone().run_sweeper(cancel.clone()));

    let placer = Placer::new(catalog.clone(), registry.clone(), args.worker_rpc_port);
    let dispatcher = Dispatcher::new(Duration::from_secs(args.dispatch_timeout_secs));
    let dispatch_consumer = tokio::spawn(consumer::run(queue.clone(), placer, dispatcher));

    let control_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", args.control_port)).await?;
    tracing::info!(port = args.control_port, "control HTTP server listening");
    let control_server = tokio::spawn(
        axum::serve(control_listener, control_api::router(registry.clone()))
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future(),
    );

    let inference_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", args.inference_port)).await?;
    tracing::info!(port = args.inference_port, "inference HTTP server listening");
    let inference_server = tokio::spawn(
        axum::serve(inference_listener, intake::router(queue.clone(), catalog))
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future(),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    cancel.cancel();
    queue.close();

    let drain = async {
        let _ = control_server.await;
        let _ = inference_server.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("HTTP servers did not drain within grace period");
    }

    let _ = sweeper.await;
    let _ = dispatch_consumer.await;
    tracing::info!("strato-master stopped");
    Ok(())
}
