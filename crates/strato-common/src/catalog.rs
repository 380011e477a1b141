use std::collections::HashMap;

/// Master-side table of model VRAM requirements, loaded once and injected
/// into intake and placement.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    sizes_gb: HashMap<String, u64>,
}

impl ModelCatalog {
    pub fn new(sizes_gb: HashMap<String, u64>) -> Self {
        Self { sizes_gb }
    }

    pub fn with_defaults() -> Self {
        Self::new(HashMap::from([
            ("lamma3-8b".to_string(), 16),
            ("gpt".to_string(), 0),
        ]))
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.sizes_gb.contains_key(model_name)
    }

    /// VRAM the model needs across the node, in MB.
    pub fn required_mb(&self, model_name: &str) -> Option<u64> {
        self.sizes_gb.get(model_name).map(|gb| gb * 1024)
    }
}

/// How to boot a serving container for one model.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    /// host path -> container path bind mounts
    pub binds: HashMap<String, String>,
    /// Port the serving process listens on inside the container.
    pub container_port: u16,
}

/// Worker-side table of launchable model backends, loaded once and injected
/// into the backend manager. A model absent from the table cannot be served
/// on this node.
#[derive(Debug, Clone)]
pub struct BackendCatalog {
    specs: HashMap<String, BackendSpec>,
}

impl BackendCatalog {
    pub fn new(specs: HashMap<String, BackendSpec>) -> Self {
        Self { specs }
    }

    pub fn with_defaults() -> Self {
        Self::new(HashMap::from([(
            "llama3-8b".to_string(),
            BackendSpec {
                image: "model:v1".to_string(),
                command: vec!["python".to_string(), "/app/server.py".to_string()],
                env: HashMap::from([(
                    "MODEL_NAME".to_string(),
                    "/models/Meta-Llama-3-8B".to_string(),
                )]),
                binds: HashMap::from([("/root/Models".to_string(), "/models".to_string())]),
                container_port: 8000,
            },
        )]))
    }

    pub fn get(&self, model_name: &str) -> Option<&BackendSpec> {
        self.specs.get(model_name)
    }
}
