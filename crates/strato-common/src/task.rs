use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Succeeded,
    Failed,
}

/// One inference request from intake until its outcome is emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InferenceTask {
    pub task_id: String,
    pub model_name: String,
    pub origin_prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_node_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_port: Option<String>,

    pub status: TaskStatus,
}

impl InferenceTask {
    pub fn new(model_name: impl Into<String>, origin_prompt: impl Into<String>) -> Self {
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4()),
            model_name: model_name.into(),
            origin_prompt: origin_prompt.into(),
            assigned_node_ip: None,
            assigned_port: None,
            status: TaskStatus::Pending,
        }
    }
}
