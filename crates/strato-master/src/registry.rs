use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use strato_common::GpuInfo;

use crate::placer::{NodeSummary, NodeView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Online,
    Unhealthy,
    Offline,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Online => write!(f, "online"),
            NodeState::Unhealthy => write!(f, "unhealthy"),
            NodeState::Offline => write!(f, "offline"),
        }
    }
}

/// One registered worker. `ip` and `port` are immutable after insertion;
/// `gpus` is replaced wholesale by each accepted heartbeat.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: String,
    pub ip: String,
    pub port: String,
    pub last_active: Instant,
    pub state: NodeState,
    pub gpus: HashMap<String, GpuInfo>,
}

impl Node {
    /// Free VRAM summed across all GPUs on the node.
    pub fn free_memory_mb(&self) -> u64 {
        self.gpus.values().map(|g| g.free_memory_mb).sum()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    InvalidArgument,
    NotFound(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidArgument => write!(f, "empty registration field"),
            RegistryError::NotFound(id) => write!(f, "node {id} not found"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Node table with heartbeat-driven liveness. All mutation happens under
/// the write lock; snapshot readers take the read lock. No I/O is performed
/// while either lock is held.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Node>>,
    heartbeat_interval: Duration,
    timeout: Duration,
}

impl NodeRegistry {
    pub fn new(heartbeat_interval: Duration, timeout: Duration) -> anyhow::Result<Arc<Self>> {
        anyhow::ensure!(
            timeout > heartbeat_interval,
            "node timeout ({timeout:?}) must exceed the heartbeat interval ({heartbeat_interval:?})"
        );
        Ok(Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            heartbeat_interval,
            timeout,
        }))
    }

    /// Idempotent: a duplicate id leaves the existing entry untouched,
    /// including `last_active` (only heartbeats refresh it).
    pub async fn register(&self, id: &str, ip: &str, port: &str) -> Result<(), RegistryError> {
        if id.is_empty() || ip.is_empty() || port.is_empty() {
            return Err(RegistryError::InvalidArgument);
        }

        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(id) {
            return Ok(());
        }

        nodes.insert(
            id.to_string(),
            Node {
                node_id: id.to_string(),
                ip: ip.to_string(),
                port: port.to_string(),
                last_active: Instant::now(),
                state: NodeState::Online,
                gpus: HashMap::new(),
            },
        );
        tracing::info!(node_id = %id, %ip, %port, "node registered");
        Ok(())
    }

    /// Refreshes liveness and replaces the GPU snapshot. The heartbeat body
    /// is an array ordered by device index; it is keyed here by ordinal.
    pub async fn heartbeat(&self, id: &str, gpus: Vec<GpuInfo>) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if node.state == NodeState::Unhealthy {
            tracing::info!(node_id = %id, "node restored to a healthy state");
        }

        node.last_active = Instant::now();
        node.state = NodeState::Online;
        node.gpus = gpus
            .into_iter()
            .enumerate()
            .map(|(idx, gpu)| (idx.to_string(), gpu))
            .collect();
        Ok(())
    }

    /// Independent deep copy of the node table, safe to iterate without
    /// holding the registry lock.
    pub async fn snapshot(&self) -> HashMap<String, Node> {
        self.nodes.read().await.clone()
    }

    /// One liveness pass: nodes silent for more than half the timeout are
    /// demoted to unhealthy, nodes past the timeout are evicted. Eviction is
    /// terminal; the worker must re-register to rejoin.
    pub async fn sweep(&self) {
        let mut nodes = self.nodes.write().await;
        let now = Instant::now();
        nodes.retain(|id, node| {
            let age = now.duration_since(node.last_active);
            if age > self.timeout {
                node.state = NodeState::Offline;
                tracing::warn!(node_id = %id, age_secs = age.as_secs(), "node offline, evicting");
                return false;
            }
            if age > self.timeout / 2 && node.state != NodeState::Unhealthy {
                node.state = NodeState::Unhealthy;
                tracing::warn!(node_id = %id, age_secs = age.as_secs(), "node unhealthy");
            }
            true
        });
    }

    /// Periodic sweep on the heartbeat interval, until cancelled.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }
}

#[async_trait::async_trait]
impl NodeView for NodeRegistry {
    async fn node_summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .read()
            .await
            .values()
            .map(|node| NodeSummary {
                node_id: node.node_id.clone(),
                ip: node.ip.clone(),
                free_memory_mb: node.free_memory_mb(),
            })
            .collect()
    }
}
