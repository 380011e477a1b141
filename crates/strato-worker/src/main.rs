mod args;
mod backend;
mod gpu;
mod registrar;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use strato_common::BackendCatalog;

use crate::args::Args;
use crate::backend::BackendManager;
use crate::registrar::Registrar;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(node_id = %args.node_id, "strato-worker starting...");

    let cancel = CancellationToken::new();

    let registrar = Registrar::new(
        args.node_id.clone(),
        args.ip.clone(),
        args.rpc_port.to_string(),
        args.master_url.clone(),
        Duration::from_secs(args.heartbeat_interval_secs),
        Duration::from_secs(args.http_timeout_secs),
    )?;
    registrar.register().await?;
    let heartbeat = tokio::spawn(registrar.clone().run(cancel.clone()));

    let backends = Arc::new(BackendManager::new(
        BackendCatalog::with_defaults(),
        Duration::from_secs(args.ready_timeout_secs),
    )?);
    let mut rpc_server = tokio::spawn(rpc::serve(backends, args.rpc_port, cancel.clone()));

    tokio::select! {
        result = &mut rpc_server => {
            cancel.cancel();
            let _ = heartbeat.await;
            return result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutdown signal received");
            cancel.cancel();
        }
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, &mut rpc_server).await.is_err() {
        tracing::warn!("RPC server did not drain within grace period");
    }
    let _ = heartbeat.await;
    tracing::info!(node_id = %args.node_id, "strato-worker stopped");
    Ok(())
}
