use std::sync::Arc;

use async_trait::async_trait;

use strato_common::ModelCatalog;

/// The slice of registry state placement needs: identity, reachability and
/// summed free VRAM. Keeps the placer decoupled from the registry type.
#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub node_id: String,
    pub ip: String,
    pub free_memory_mb: u64,
}

#[async_trait]
pub trait NodeView: Send + Sync {
    async fn node_summaries(&self) -> Vec<NodeSummary>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum PlaceError {
    UnsupportedModel(String),
    NoCapacity { model_name: String, required_mb: u64 },
}

impl std::fmt::Display for PlaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaceError::UnsupportedModel(model) => write!(f, "model {model} not supported"),
            PlaceError::NoCapacity {
                model_name,
                required_mb,
            } => write!(f, "no node can fit model {model_name} ({required_mb} MB required)"),
        }
    }
}

impl std::error::Error for PlaceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub node_id: String,
    pub ip: String,
    pub rpc_port: u16,
}

/// First-fit placement over summed free VRAM. Nodes are visited in id order
/// so a given snapshot always yields the same choice; best-fit packing is
/// deliberately out of scope.
pub struct Placer {
    catalog: ModelCatalog,
    nodes: Arc<dyn NodeView>,
    rpc_port: u16,
}

impl Placer {
    pub fn new(catalog: ModelCatalog, nodes: Arc<dyn NodeView>, rpc_port: u16) -> Self {
        Self {
            catalog,
            nodes,
            rpc_port,
        }
    }

    pub async fn place(&self, model_name: &str) -> Result<Placement, PlaceError> {
        let required_mb = self
            .catalog
            .required_mb(model_name)
            .ok_or_else(|| PlaceError::UnsupportedModel(model_name.to_string()))?;

        let mut summaries = self.nodes.node_summaries().await;
        summaries.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        summaries
            .into_iter()
            .find(|node| node.free_memory_mb >= required_mb)
            .map(|node| Placement {
                node_id: node.node_id,
                ip: node.ip,
                rpc_port: self.rpc_port,
            })
            .ok_or_else(|| PlaceError::NoCapacity {
                model_name: model_name.to_string(),
                required_mb,
            })
    }
}
