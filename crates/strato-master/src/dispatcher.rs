use std::time::Duration;

use tonic::Request;

use strato_common::InferenceTask;
use strato_proto::schedule::schedule_service_client::ScheduleServiceClient;
use strato_proto::schedule::ScheduleRequest;

use crate::placer::Placement;

#[derive(Debug)]
pub enum DispatchError {
    Unavailable(String),
    Timeout,
    Rpc(String),
    Backend(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Unavailable(e) => write!(f, "worker unavailable: {e}"),
            DispatchError::Timeout => write!(f, "dispatch deadline exceeded"),
            DispatchError::Rpc(e) => write!(f, "rpc failed: {e}"),
            DispatchError::Backend(msg) => write!(f, "backend failure: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// A worker's successful reply: the host port its backend serves on and the
/// generated text.
#[derive(Debug)]
pub struct Dispatched {
    pub port: String,
    pub message: String,
}

/// RPC client for placement commands. Connections are short-lived, one dial
/// per task; the whole exchange is bounded by a single deadline because
/// container startup dominates the round trip.
pub struct Dispatcher {
    deadline: Duration,
}

impl Dispatcher {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub async fn dispatch(
        &self,
        placement: &Placement,
        task: &InferenceTask,
    ) -> Result<Dispatched, DispatchError> {
        match tokio::time::timeout(self.deadline, self.call(placement, task)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        }
    }

    async fn call(
        &self,
        placement: &Placement,
        task: &InferenceTask,
    ) -> Result<Dispatched, DispatchError> {
        let endpoint = format!("http://{}:{}", placement.ip, placement.rpc_port);
        let mut client = ScheduleServiceClient::connect(endpoint)
            .await
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;

        let reply = client
            .process_message(Request::new(ScheduleRequest {
                model_name: task.model_name.clone(),
                origin_prompt: task.origin_prompt.clone(),
            }))
            .await
            .map_err(|status| DispatchError::Rpc(status.to_string()))?
            .into_inner();

        if reply.success {
            Ok(Dispatched {
                port: reply.port,
                message: reply.message,
            })
        } else {
            Err(DispatchError::Backend(reply.message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::transport::Server;
    use tonic::{Response, Status};

    use strato_proto::schedule::schedule_service_server::{ScheduleService, ScheduleServiceServer};
    use strato_proto::schedule::ScheduleResponse;

    struct StubWorker;

    #[tonic::async_trait]
    impl ScheduleService for StubWorker {
        async fn process_message(
            &self,
            request: Request<ScheduleRequest>,
        ) -> Result<Response<ScheduleResponse>, Status> {
            let req = request.into_inner();
            let reply = if req.model_name == "llama3-8b" {
                ScheduleResponse {
                    success: true,
                    port: "31122".to_string(),
                    message: format!("echo: {}", req.origin_prompt),
                }
            } else {
                ScheduleResponse {
                    success: false,
                    port: String::new(),
                    message: format!("model {} not supported", req.model_name),
                }
            };
            Ok(Response::new(reply))
        }
    }

    async fn spawn_stub_worker() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(
            Server::builder()
                .add_service(ScheduleServiceServer::new(StubWorker))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );
        port
    }

    fn placement(rpc_port: u16) -> Placement {
        Placement {
            node_id: "n1".to_string(),
            ip: "127.0.0.1".to_string(),
            rpc_port,
        }
    }

    #[tokio::test]
    async fn successful_reply_carries_port_and_message() {
        let port = spawn_stub_worker().await;
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        let task = InferenceTask::new("llama3-8b", "hello");

        let out = dispatcher.dispatch(&placement(port), &task).await.unwrap();
        assert_eq!(out.port, "31122");
        assert_eq!(out.message, "echo: hello");
    }

    #[tokio::test]
    async fn worker_reported_failure_maps_to_backend_error() {
        let port = spawn_stub_worker().await;
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        let task = InferenceTask::new("nope", "hello");

        match dispatcher.dispatch(&placement(port), &task).await {
            Err(DispatchError::Backend(msg)) => assert_eq!(msg, "model nope not supported"),
            other => panic!("expected backend failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dial_failure_maps_to_unavailable() {
        let dispatcher = Dispatcher::new(Duration::from_secs(5));
        let task = InferenceTask::new("llama3-8b", "hello");

        // Nothing listens on port 1.
        match dispatcher.dispatch(&placement(1), &task).await {
            Err(DispatchError::Unavailable(_)) => {}
            other => panic!("expected unavailable, got {other:?}"),
        }
    }
}
