use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::gpu;

#[derive(Debug)]
pub enum HeartbeatError {
    NotRegistered,
    Transport(reqwest::Error),
    UnexpectedStatus(StatusCode),
}

impl std::fmt::Display for HeartbeatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatError::NotRegistered => write!(f, "node not registered"),
            HeartbeatError::Transport(e) => write!(f, "heartbeat request failed: {e}"),
            HeartbeatError::UnexpectedStatus(code) => {
                write!(f, "heartbeat rejected with status {code}")
            }
        }
    }
}

impl std::error::Error for HeartbeatError {}

/// Keeps this node registered with the master and its GPU snapshot fresh.
/// The mutex serialises register and heartbeat so a heartbeat can never
/// interleave with a re-registration.
pub struct Registrar {
    node_id: String,
    ip: String,
    port: String,
    master_url: String,
    interval: Duration,
    http: reqwest::Client,
    registered: Mutex<bool>,
}

impl Registrar {
    pub fn new(
        node_id: String,
        ip: String,
        port: String,
        master_url: String,
        interval: Duration,
        http_timeout: Duration,
    ) -> anyhow::Result<Arc<Self>> {
        let http = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Arc::new(Self {
            node_id,
            ip,
            port,
            master_url: master_url.trim_end_matches('/').to_string(),
            interval,
            http,
            registered: Mutex::new(false),
        }))
    }

    /// Registers with the master. Only a 201 reply counts as registered.
    pub async fn register(&self) -> anyhow::Result<()> {
        let mut registered = self.registered.lock().await;

        let resp = self
            .http
            .post(format!("{}/register", self.master_url))
            .form(&[
                ("node_id", self.node_id.as_str()),
                ("ip", self.ip.as_str()),
                ("port", self.port.as_str()),
            ])
            .send()
            .await?;

        anyhow::ensure!(
            resp.status() == StatusCode::CREATED,
            "registration rejected with status {}",
            resp.status()
        );

        *registered = true;
        tracing::info!(node_id = %self.node_id, master = %self.master_url, "registered with master");
        Ok(())
    }

    /// One heartbeat carrying the current GPU snapshot. A probe failure is
    /// reported as an empty GPU list so a transient NVML error cannot get
    /// this node evicted. A 404 reply means the master no longer knows us;
    /// the state flips back to unregistered.
    pub async fn send_heartbeat(&self) -> Result<(), HeartbeatError> {
        let mut registered = self.registered.lock().await;
        if !*registered {
            return Err(HeartbeatError::NotRegistered);
        }

        let gpus = match gpu::probe_gpus().await {
            Ok(gpus) => gpus,
            Err(e) => {
                tracing::warn!(error = %e, "gpu probe failed, sending empty snapshot");
                Vec::new()
            }
        };

        let resp = self
            .http
            .post(format!("{}/heartbeat", self.master_url))
            .query(&[("node_id", self.node_id.as_str())])
            .json(&gpus)
            .send()
            .await
            .map_err(HeartbeatError::Transport)?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                *registered = false;
                Err(HeartbeatError::NotRegistered)
            }
            other => Err(HeartbeatError::UnexpectedStatus(other)),
        }
    }

    /// Fixed-rate heartbeat loop. A not-registered failure triggers an
    /// immediate re-registration attempt; anything else is retried on the
    /// next tick. Terminates on cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("heartbeat loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.send_heartbeat().await {
                        Ok(()) => tracing::debug!(node_id = %self.node_id, "heartbeat sent"),
                        Err(HeartbeatError::NotRegistered) => {
                            tracing::warn!(node_id = %self.node_id, "not registered, re-registering");
                            if let Err(e) = self.register().await {
                                tracing::warn!(error = %e, "re-registration failed");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;

    use super::*;

    #[derive(Clone)]
    struct StubMaster {
        registrations: Arc<AtomicUsize>,
        heartbeat_status: StatusCode,
    }

    async fn stub_register(State(st): State<StubMaster>) -> impl IntoResponse {
        st.registrations.fetch_add(1, Ordering::SeqCst);
        (StatusCode::CREATED, "Node n1 registered successfully")
    }

    async fn stub_heartbeat(State(st): State<StubMaster>) -> impl IntoResponse {
        st.heartbeat_status
    }

    async fn spawn_stub_master(heartbeat_status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let registrations = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/register", post(stub_register))
            .route("/heartbeat", post(stub_heartbeat))
            .with_state(StubMaster {
                registrations: registrations.clone(),
                heartbeat_status,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), registrations)
    }

    fn registrar(master_url: String) -> Arc<Registrar> {
        Registrar::new(
            "n1".to_string(),
            "127.0.0.1".to_string(),
            "10000".to_string(),
            master_url,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn heartbeat_before_registration_is_rejected_locally() {
        let (url, _registrations) = spawn_stub_master(StatusCode::OK).await;
        let reg = registrar(url);
        assert!(matches!(
            reg.send_heartbeat().await,
            Err(HeartbeatError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn register_then_heartbeat_succeeds() {
        let (url, registrations) = spawn_stub_master(StatusCode::OK).await;
        let reg = registrar(url);
        reg.register().await.unwrap();
        assert_eq!(registrations.load(Ordering::SeqCst), 1);
        reg.send_heartbeat().await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_404_flips_back_to_unregistered() {
        let (url, registrations) = spawn_stub_master(StatusCode::NOT_FOUND).await;
        let reg = registrar(url);
        reg.register().await.unwrap();

        assert!(matches!(
            reg.send_heartbeat().await,
            Err(HeartbeatError::NotRegistered)
        ));
        // State flipped: the next heartbeat fails locally, no HTTP involved.
        assert!(matches!(
            reg.send_heartbeat().await,
            Err(HeartbeatError::NotRegistered)
        ));

        // Re-registration is accepted again.
        reg.register().await.unwrap();
        assert_eq!(registrations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_201_registration_reply_is_an_error() {
        let (url, _registrations) = spawn_stub_master(StatusCode::OK).await;
        // A bad base path makes /register answer 404 instead of 201.
        let reg = Registrar::new(
            "n1".to_string(),
            "127.0.0.1".to_string(),
            "10000".to_string(),
            format!("{url}/missing"),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(reg.register().await.is_err());
    }
}
