use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    /// Listener for worker registration and heartbeats.
    #[arg(long, default_value_t = 8080)]
    pub control_port: u16,

    /// Listener for inference requests.
    #[arg(long, default_value_t = 9090)]
    pub inference_port: u16,

    #[arg(long, default_value_t = 5)]
    pub heartbeat_interval_secs: u64,

    /// A node silent for longer than this is evicted. Must exceed the
    /// heartbeat interval.
    #[arg(long, default_value_t = 15)]
    pub node_timeout_secs: u64,

    #[arg(long, default_value_t = 128)]
    pub queue_capacity: usize,

    /// Port every worker's schedule RPC server listens on.
    #[arg(long, default_value_t = 10000)]
    pub worker_rpc_port: u16,

    /// Deadline for one dispatch round trip, container startup included.
    #[arg(long, default_value_t = 30)]
    pub dispatch_timeout_secs: u64,
}
