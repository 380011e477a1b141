use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::Mutex;

use strato_common::{BackendCatalog, BackendSpec};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of one served prompt: where the backend ended up listening and
/// what it generated.
#[derive(Debug)]
pub struct ServedPrompt {
    pub host_port: u16,
    pub result: String,
}

#[derive(Debug, Clone)]
struct RunningBackend {
    container_name: String,
    host_port: u16,
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    status: String,
    device: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    result: String,
}

/// Owns model-backend containers on this node: boots one per placement
/// command, gates on readiness, relays the prompt, and tears the container
/// down when a later stage fails. Container names derive from a per-task
/// backend id so concurrent backends coexist.
pub struct BackendManager {
    catalog: BackendCatalog,
    http: reqwest::Client,
    ready_timeout: Duration,
    running: Mutex<HashMap<String, RunningBackend>>,
}

impl BackendManager {
    pub fn new(catalog: BackendCatalog, ready_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self {
            catalog,
            http,
            ready_timeout,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Full per-request sequence: catalog lookup, container start, readiness
    /// gate, prompt relay. The catalog is consulted first so an unsupported
    /// model touches neither the port allocator nor the container runtime.
    pub async fn serve_prompt(&self, model_name: &str, prompt: &str) -> anyhow::Result<ServedPrompt> {
        let spec = self
            .catalog
            .get(model_name)
            .with_context(|| format!("model {model_name} not supported"))?;

        let backend_id = format!("infer-{}", uuid::Uuid::new_v4());
        let host_port = allocate_host_port().await?;

        start_container(&backend_id, spec, host_port).await?;
        self.running.lock().await.insert(
            backend_id.clone(),
            RunningBackend {
                container_name: backend_id.clone(),
                host_port,
            },
        );
        tracing::info!(%backend_id, host_port, model = %model_name, "backend container started");

        let base_url = format!("http://localhost:{host_port}");
        if let Err(e) = self.wait_backend_ready(&base_url).await {
            self.remove_backend(&backend_id).await;
            return Err(e);
        }

        match self.generate(&base_url, prompt).await {
            Ok(result) => Ok(ServedPrompt { host_port, result }),
            Err(e) => {
                self.remove_backend(&backend_id).await;
                Err(e)
            }
        }
    }

    /// Polls the backend's /health until its reply decodes; the status text
    /// itself is not inspected. Bails once the overall deadline passes.
    async fn wait_backend_ready(&self, base_url: &str) -> anyhow::Result<()> {
        let url = format!("{base_url}/health");
        let start = tokio::time::Instant::now();
        loop {
            anyhow::ensure!(
                start.elapsed() <= self.ready_timeout,
                "backend not ready within {:?}",
                self.ready_timeout
            );

            match self
                .http
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(resp) => match resp.json::<HealthReply>().await {
                    Ok(health) => {
                        tracing::info!(status = %health.status, device = %health.device, "backend ready");
                        return Ok(());
                    }
                    Err(e) => tracing::debug!(error = %e, "health reply not decodable yet"),
                },
                Err(e) => tracing::debug!(error = %e, "health probe failed"),
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn generate(&self, base_url: &str, prompt: &str) -> anyhow::Result<String> {
        let reply: GenerateReply = self
            .http
            .post(format!("{base_url}/generate"))
            .json(&GenerateRequest { prompt })
            .send()
            .await
            .context("generate request failed")?
            .json()
            .await
            .context("generate reply not decodable")?;
        Ok(reply.result)
    }

    /// Force-removes the backend's container and forgets it. Safe to call
    /// for an id that was already removed.
    pub async fn remove_backend(&self, backend_id: &str) {
        let Some(backend) = self.running.lock().await.remove(backend_id) else {
            return;
        };

        match find_container_id(&backend.container_name).await {
            Ok(Some(container_id)) => {
                let removed = Command::new("docker")
                    .args(["rm", "-f", &container_id])
                    .output()
                    .await;
                match removed {
                    Ok(out) if out.status.success() => {
                        tracing::info!(
                            container = %backend.container_name,
                            host_port = backend.host_port,
                            "backend container removed"
                        );
                    }
                    Ok(out) => tracing::warn!(
                        container = %backend.container_name,
                        stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                        "failed to remove backend container"
                    ),
                    Err(e) => tracing::warn!(container = %backend.container_name, error = %e, "docker rm failed"),
                }
            }
            Ok(None) => {
                tracing::warn!(container = %backend.container_name, "container not found during teardown");
            }
            Err(e) => {
                tracing::warn!(container = %backend.container_name, error = %e, "container listing failed");
            }
        }
    }

    #[cfg(test)]
    async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }
}

/// Binds an ephemeral port, records it, and releases it for the container
/// runtime. Container startup is slow enough that reuse before the publish
/// lands is not a practical concern.
async fn allocate_host_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .context("no ephemeral port available")?;
    Ok(listener.local_addr()?.port())
}

async fn start_container(name: &str, spec: &BackendSpec, host_port: u16) -> anyhow::Result<()> {
    let mut cmd = Command::new("docker");
    cmd.arg("run")
        .arg("-d")
        .arg("--name")
        .arg(name)
        .arg("--privileged")
        .arg("--gpus")
        .arg("all")
        .arg("-p")
        .arg(format!("{host_port}:{}", spec.container_port));
    for (host_path, container_path) in &spec.binds {
        cmd.arg("-v").arg(format!("{host_path}:{container_path}"));
    }
    for (key, value) in &spec.env {
        cmd.arg("-e").arg(format!("{key}={value}"));
    }
    cmd.arg(&spec.image);
    for part in &spec.command {
        cmd.arg(part);
    }

    let output = cmd.output().await.context("docker run failed to execute")?;
    anyhow::ensure!(
        output.status.success(),
        "docker run failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
    );
    Ok(())
}

/// Resolves a container name to its id via `docker ps -a`. Docker reports
/// names with a leading slash in some surfaces; both forms match.
async fn find_container_id(name: &str) -> anyhow::Result<Option<String>> {
    let output = Command::new("docker")
        .args(["ps", "-a", "--format", "{{.ID}}\t{{.Names}}"])
        .output()
        .await
        .context("docker ps failed to execute")?;
    anyhow::ensure!(output.status.success(), "docker ps exited with {}", output.status);

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let Some((id, names)) = line.split_once('\t') else {
            continue;
        };
        if names
            .split(',')
            .any(|n| n.trim().trim_start_matches('/') == name)
        {
            return Ok(Some(id.to_string()));
        }
    }
    Ok(None)
}
