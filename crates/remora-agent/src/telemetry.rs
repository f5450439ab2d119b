//! Host telemetry collection
//!
//! One snapshot per auth and per heartbeat. Collection runs on the
//! blocking pool because sysinfo's CPU sampling sleeps between refreshes;
//! failures are folded into the wire-level `{error}` form rather than
//! propagated, so a broken sensor never takes the channel down.

use std::net::UdpSocket;

use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use remora_proto::{SystemInfo, TelemetryReport};

use crate::error::{AgentError, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Take one telemetry snapshot, never failing outward.
pub async fn snapshot() -> SystemInfo {
    match tokio::task::spawn_blocking(collect).await {
        Ok(Ok(report)) => SystemInfo::Report(report),
        Ok(Err(e)) => SystemInfo::Error { error: e.to_string() },
        Err(e) => SystemInfo::Error { error: e.to_string() },
    }
}

fn collect() -> Result<TelemetryReport> {
    let mut sys = System::new();

    // Two refreshes bracket the sampling interval; a single refresh
    // always reports 0% CPU.
    sys.refresh_cpu();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();
    sys.refresh_memory();

    let cpu_percent = sys.global_cpu_info().cpu_usage();

    let memory_total = sys.total_memory();
    let memory_used = sys.used_memory();
    if memory_total == 0 {
        return Err(AgentError::Telemetry("memory statistics unavailable".to_string()));
    }
    let memory_percent = (memory_used as f64 / memory_total as f64 * 100.0) as f32;

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().next())
        .ok_or_else(|| AgentError::Telemetry("no disks found".to_string()))?;
    let disk_total = disk.total_space();
    let disk_used = disk_total.saturating_sub(disk.available_space());
    let disk_percent = if disk_total == 0 {
        0.0
    } else {
        (disk_used as f64 / disk_total as f64 * 100.0) as f32
    };

    Ok(TelemetryReport {
        cpu_percent,
        memory_percent,
        memory_used_gb: round_gb(memory_used),
        memory_total_gb: round_gb(memory_total),
        disk_percent,
        disk_used_gb: round_gb(disk_used),
        disk_total_gb: round_gb(disk_total),
        boot_time: System::boot_time(),
        ip_address: primary_ip(),
    })
}

/// Primary outbound IP, found by routing a UDP socket at a public
/// address. No packet is sent; the local address the kernel picks for
/// the route is the answer. Falls back to loopback when the host has no
/// route at all.
fn primary_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn round_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_gb_keeps_two_decimals() {
        assert_eq!(round_gb(8 * 1024 * 1024 * 1024), 8.0);
        assert_eq!(round_gb(1_610_612_736), 1.5);
    }

    #[test]
    fn primary_ip_is_always_an_address() {
        let ip: std::net::IpAddr = primary_ip().parse().unwrap();
        assert!(!ip.to_string().is_empty());
    }

    #[tokio::test]
    async fn snapshot_produces_a_report_on_a_real_host() {
        match snapshot().await {
            SystemInfo::Report(report) => {
                assert!(report.memory_total_gb > 0.0);
                assert!(report.memory_percent >= 0.0 && report.memory_percent <= 100.0);
                assert!(report.boot_time > 0);
            }
            // Containers without /proc visibility legitimately fail here.
            SystemInfo::Error { error } => assert!(!error.is_empty()),
        }
    }
}
