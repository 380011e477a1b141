use tokio::process::Command;

use strato_common::GpuInfo;

/// Snapshot of every visible GPU via nvidia-smi. Devices whose memory
/// figures cannot be read are skipped.
pub async fn probe_gpus() -> anyhow::Result<Vec<GpuInfo>> {
    let output = Command::new("nvidia-smi")
        .arg("--query-gpu=name,memory.total,memory.free")
        .arg("--format=csv,noheader,nounits")
        .output()
        .await?;
    anyhow::ensure!(
        output.status.success(),
        "nvidia-smi exited with {}",
        output.status
    );

    Ok(parse_query_output(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_query_output(stdout: &str) -> Vec<GpuInfo> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 {
            continue;
        }
        let Ok(total) = parts[parts.len() - 2].parse::<u64>() else {
            continue;
        };
        let Ok(free) = parts[parts.len() - 1].parse::<u64>() else {
            continue;
        };
        // The name itself may contain commas; everything before the two
        // memory columns belongs to it.
        let name = parts[..parts.len() - 2].join(", ");
        out.push(GpuInfo {
            gpu_model: name,
            total_memory_mb: total,
            free_memory_mb: free,
        });
    }
    out
}
