use serde::{Deserialize, Serialize};

/// One GPU as advertised in a worker heartbeat. Values are a snapshot taken
/// at emission time; staleness is bounded by the heartbeat interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpuInfo {
    pub gpu_model: String,
    pub total_memory_mb: u64,
    pub free_memory_mb: u64,
}
