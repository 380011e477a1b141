use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use strato_proto::schedule::schedule_service_server::{ScheduleService, ScheduleServiceServer};
use strato_proto::schedule::{ScheduleRequest, ScheduleResponse};

use crate::backend::BackendManager;

pub struct SchedulerRpc {
    backends: Arc<BackendManager>,
}

impl SchedulerRpc {
    pub fn new(backends: Arc<BackendManager>) -> Self {
        Self { backends }
    }
}

#[tonic::async_trait]
impl ScheduleService for SchedulerRpc {
    /// Task-level failures never become a transport error: every stage
    /// failure is reported as `success=false` with the stage's message, so
    /// the master can log and move on.
    async fn process_message(
        &self,
        request: Request<ScheduleRequest>,
    ) -> Result<Response<ScheduleResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(model = %req.model_name, "placement command received");

        let reply = match self
            .backends
            .serve_prompt(&req.model_name, &req.origin_prompt)
            .await
        {
            Ok(served) => ScheduleResponse {
                success: true,
                port: served.host_port.to_string(),
                message: served.result,
            },
            Err(e) => {
                tracing::warn!(model = %req.model_name, error = %e, "backend provisioning failed");
                ScheduleResponse {
                    success: false,
                    port: String::new(),
                    message: e.to_string(),
                }
            }
        };

        Ok(Response::new(reply))
    }
}

/// Schedule RPC server on the worker's well-known port, plaintext.
pub async fn serve(
    backends: Arc<BackendManager>,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "schedule RPC server listening");

    Server::builder()
        .add_service(ScheduleServiceServer::new(SchedulerRpc::new(backends)))
        .serve_with_shutdown(addr, cancel.cancelled_owned())
        .await?;

    tracing::info!("schedule RPC server stopped");
    Ok(())
}
