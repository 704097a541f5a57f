//! Host metrics sampling.
//!
//! A metrics snapshot is an opaque comma-delimited string; the
//! protocol transports it whole and never parses its fields. The
//! producing side emits, in order: average CPU usage percent (two
//! decimal places), available memory bytes, total memory bytes, then
//! bytes sent and bytes received summed across all network interfaces.
//!
//! The trait exists so tests can drive the listener with a fixed
//! snapshot instead of reading the host.

use anyhow::Result;
use async_trait::async_trait;
use sysinfo::{Networks, System};

/// Source of local metrics snapshots.
#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    async fn sample(&self) -> Result<String>;
}

/// Samples the local host via `sysinfo`.
pub struct SystemMetrics;

#[async_trait]
impl MetricsSource for SystemMetrics {
    async fn sample(&self) -> Result<String> {
        // CPU usage needs two refreshes with a delay in between, so the
        // whole sample runs on the blocking pool.
        tokio::task::spawn_blocking(sample_host).await?
    }
}

fn sample_host() -> Result<String> {
    let mut system = System::new();

    system.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu();
    let cpu_percent = system.global_cpu_info().cpu_usage();

    system.refresh_memory();

    let networks = Networks::new_with_refreshed_list();
    let mut bytes_sent: u64 = 0;
    let mut bytes_received: u64 = 0;
    for (_name, data) in &networks {
        bytes_sent += data.total_transmitted();
        bytes_received += data.total_received();
    }

    Ok(format!(
        "{:.2},{},{},{},{}",
        cpu_percent,
        system.available_memory(),
        system.total_memory(),
        bytes_sent,
        bytes_received
    ))
}
