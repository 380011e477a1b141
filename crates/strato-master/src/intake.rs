use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use strato_common::{InferenceTask, ModelCatalog};

use crate::queue::WaitQueue;

#[derive(Clone)]
pub struct IntakeState {
    pub queue: Arc<WaitQueue>,
    pub catalog: ModelCatalog,
}

/// Inference intake listener: accepts prompts and reports queue depth.
pub fn router(queue: Arc<WaitQueue>, catalog: ModelCatalog) -> Router {
    Router::new()
        .route("/inference", post(handle_inference).fallback(method_not_allowed))
        .route("/health", get(handle_health))
        .with_state(IntakeState { queue, catalog })
}

async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
}

#[derive(Debug, Deserialize)]
struct InferenceBody {
    #[serde(default)]
    model_name: String,
    #[serde(default)]
    origin_prompt: String,
}

/// Intake is fire-and-forget: the reply acknowledges queueing, not the
/// dispatch outcome, which is logged by the consumer.
async fn handle_inference(State(st): State<IntakeState>, body: String) -> Response {
    let body: InferenceBody = match serde_json::from_str(&body) {
        Ok(body) => body,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid request body").into_response(),
    };

    if body.model_name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "model_name and prompt are required",
        )
            .into_response();
    }

    if !st.catalog.contains(&body.model_name) {
        return (
            StatusCode::BAD_REQUEST,
            format!("model {} not supported", body.model_name),
        )
            .into_response();
    }

    let task = InferenceTask::new(body.model_name, body.origin_prompt);
    let task_id = task.task_id.clone();
    match st.queue.enqueue(task) {
        Ok(()) => {
            tracing::info!(%task_id, depth = st.queue.depth(), "task enqueued");
            (StatusCode::OK, task_id).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn handle_health(State(st): State<IntakeState>) -> Response {
    (
        StatusCode::OK,
        format!("等待队列中的任务数：{}", st.queue.depth()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    async fn spawn_intake(capacity: usize) -> (SocketAddr, Arc<WaitQueue>) {
        let queue = Arc::new(WaitQueue::new(capacity));
        let app = router(queue.clone(), ModelCatalog::with_defaults());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, queue)
    }

    async fn post_inference(addr: SocketAddr, body: &serde_json::Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{addr}/inference"))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn third_request_on_a_two_slot_queue_is_rejected() {
        let (addr, queue) = spawn_intake(2).await;
        let body = serde_json::json!({"model_name": "lamma3-8b", "origin_prompt": "x"});

        for _ in 0..2 {
            let resp = post_inference(addr, &body).await;
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
            assert!(resp.text().await.unwrap().starts_with("task_"));
        }
        let resp = post_inference(addr, &body).await;
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.text().await.unwrap(), "queue full");
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn tasks_are_queued_in_arrival_order() {
        let (addr, queue) = spawn_intake(8).await;
        let mut replied_ids = Vec::new();
        for prompt in ["first", "second"] {
            let body = serde_json::json!({"model_name": "gpt", "origin_prompt": prompt});
            replied_ids.push(post_inference(addr, &body).await.text().await.unwrap());
        }

        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.origin_prompt, "first");
        assert_eq!(first.task_id, replied_ids[0]);
        let second = queue.dequeue().await.unwrap();
        assert_eq!(second.origin_prompt, "second");
        assert_eq!(second.task_id, replied_ids[1]);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (addr, _queue) = spawn_intake(2).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/inference"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(resp.text().await.unwrap(), "Invalid request body");
    }

    #[tokio::test]
    async fn missing_model_name_is_rejected() {
        let (addr, _queue) = spawn_intake(2).await;
        let resp = post_inference(addr, &serde_json::json!({"origin_prompt": "x"})).await;
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(resp.text().await.unwrap(), "model_name and prompt are required");
    }

    #[tokio::test]
    async fn uncatalogued_model_is_rejected_at_intake() {
        let (addr, queue) = spawn_intake(2).await;
        let body = serde_json::json!({"model_name": "nope", "origin_prompt": "x"});
        let resp = post_inference(addr, &body).await;
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(resp.text().await.unwrap(), "model nope not supported");
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn health_reports_queue_depth() {
        let (addr, _queue) = spawn_intake(4).await;
        let body = serde_json::json!({"model_name": "gpt", "origin_prompt": "x"});
        post_inference(addr, &body).await;

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "等待队列中的任务数：1");
    }
}
