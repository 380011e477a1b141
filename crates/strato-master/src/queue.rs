use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use strato_common::InferenceTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
    Closed,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Full => write!(f, "queue full"),
            QueueError::Closed => write!(f, "queue closed"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Bounded FIFO between intake and the dispatch consumer. Enqueue never
/// blocks; dequeue parks until an item arrives or the queue is closed.
/// Close is idempotent and wakes every waiter; remaining items are drained
/// before closure is reported to the consumer.
pub struct WaitQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

struct Inner {
    items: VecDeque<InferenceTask>,
    closed: bool,
}

impl WaitQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn enqueue(&self, task: InferenceTask) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("wait queue lock poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.items.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        inner.items.push_back(task);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn dequeue(&self) -> Result<InferenceTask, QueueError> {
        loop {
            // Register interest before checking state, otherwise a close or
            // enqueue landing between the check and the await is lost.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().expect("wait queue lock poisoned");
                if let Some(task) = inner.items.pop_front() {
                    return Ok(task);
                }
                if inner.closed {
                    return Err(QueueError::Closed);
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("wait queue lock poisoned");
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().expect("wait queue lock poisoned").items.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn task(model: &str) -> InferenceTask {
        InferenceTask::new(model, "hi")
    }

    #[tokio::test]
    async fn dequeue_preserves_arrival_order() {
        let q = WaitQueue::new(8);
        for name in ["a", "b", "c"] {
            q.enqueue(task(name)).unwrap();
        }
        assert_eq!(q.dequeue().await.unwrap().model_name, "a");
        assert_eq!(q.dequeue().await.unwrap().model_name, "b");
        assert_eq!(q.dequeue().await.unwrap().model_name, "c");
    }

    #[tokio::test]
    async fn enqueue_on_full_queue_fails_without_blocking() {
        let q = WaitQueue::new(2);
        q.enqueue(task("a")).unwrap();
        q.enqueue(task("b")).unwrap();
        assert_eq!(q.enqueue(task("c")), Err(QueueError::Full));
        assert_eq!(q.depth(), 2);
    }

    #[tokio::test]
    async fn enqueue_after_close_fails() {
        let q = WaitQueue::new(2);
        q.close();
        assert_eq!(q.enqueue(task("a")), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn close_drains_remaining_items_before_reporting_closure() {
        let q = WaitQueue::new(2);
        q.enqueue(task("a")).unwrap();
        q.close();
        assert_eq!(q.dequeue().await.unwrap().model_name, "a");
        assert_eq!(q.dequeue().await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn close_unblocks_a_parked_consumer() {
        let q = Arc::new(WaitQueue::new(2));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue().await })
        };

        tokio::task::yield_now().await;
        q.close();
        q.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer still parked after close")
            .unwrap();
        assert_eq!(result, Err(QueueError::Closed));
    }
}
