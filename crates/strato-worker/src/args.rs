use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    /// Cluster-unique node id.
    #[arg(long, default_value = "node_1")]
    pub node_id: String,

    /// Address this node advertises to the master.
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,

    /// Port for the schedule RPC server; also advertised at registration.
    #[arg(long, default_value_t = 10000)]
    pub rpc_port: u16,

    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub master_url: String,

    #[arg(long, default_value_t = 2)]
    pub heartbeat_interval_secs: u64,

    /// Per-request timeout for master-bound HTTP calls.
    #[arg(long, default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// How long a freshly started backend may take to answer /health.
    #[arg(long, default_value_t = 300)]
    pub ready_timeout_secs: u64,
}
