//! Process memory sampling for heartbeats.

use crate::protocol::MemoryUsage;

/// Samples the current process memory. Zeroes where the platform offers nothing.
pub fn sample_memory() -> MemoryUsage {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => parse_proc_status(&status),
            Err(err) => {
                tracing::debug!(error = %err, "cannot read /proc/self/status");
                MemoryUsage::default()
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        MemoryUsage::default()
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_status(status: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            usage.rss_bytes = parse_kib(rest);
        } else if let Some(rest) = line.strip_prefix("VmSize:") {
            usage.virtual_bytes = parse_kib(rest);
        }
    }
    usage
}

fn parse_kib(field: &str) -> u64 {
    field
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .map_or(0, |kib| kib.saturating_mul(1024))
}
