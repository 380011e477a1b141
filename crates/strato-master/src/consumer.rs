use std::sync::Arc;

use strato_common::TaskStatus;

use crate::dispatcher::Dispatcher;
use crate::placer::Placer;
use crate::queue::WaitQueue;

/// The single dispatch consumer: dequeue -> place -> dispatch, in arrival
/// order. One consumer keeps FIFO dispatch and avoids racing placement
/// decisions against stale snapshots. Placement and dispatch failures are
/// logged and the loop moves on; only queue closure ends it.
pub async fn run(queue: Arc<WaitQueue>, placer: Placer, dispatcher: Dispatcher) {
    loop {
        let mut task = match queue.dequeue().await {
            Ok(task) => task,
            Err(_) => {
                tracing::info!("wait queue closed, dispatch consumer exiting");
                return;
            }
        };

        tracing::info!(task_id = %task.task_id, model = %task.model_name, "task dequeued");

        let placement = match placer.place(&task.model_name).await {
            Ok(placement) => placement,
            Err(e) => {
                task.status = TaskStatus::Failed;
                tracing::warn!(task_id = %task.task_id, status = ?task.status, error = %e, "placement failed");
                continue;
            }
        };

        task.status = TaskStatus::Scheduled;
        task.assigned_node_ip = Some(placement.ip.clone());
        tracing::info!(
            task_id = %task.task_id,
            node_id = %placement.node_id,
            ip = task.assigned_node_ip.as_deref().unwrap_or(""),
            status = ?task.status,
            "task scheduled"
        );

        match dispatcher.dispatch(&placement, &task).await {
            Ok(outcome) => {
                task.assigned_port = Some(outcome.port);
                task.status = TaskStatus::Succeeded;
                tracing::info!(
                    task_id = %task.task_id,
                    node_id = %placement.node_id,
                    port = task.assigned_port.as_deref().unwrap_or(""),
                    status = ?task.status,
                    result = %outcome.message,
                    "inference completed"
                );
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                tracing::warn!(
                    task_id = %task.task_id,
                    node_id = %placement.node_id,
                    status = ?task.status,
                    error = %e,
                    "dispatch failed"
                );
            }
        }
    }
}
