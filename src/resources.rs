//! System resource health: CPU, memory, disk.
//!
//! Read-only queries of OS state. The supervisor logs a snapshot on every
//! heartbeat, and the exited-bundler remediation uses one to decide between
//! restarting and giving up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::config::ResourcesConfig;

/// Usage above this is worth a warning, though not yet unhealthy.
pub const WARN_PERCENT: f32 = 80.0;

const GIB: u64 = 1 << 30;

/// One reading of system resources.
///
/// Disk fields are `None` when the filesystem could not be queried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: Option<f32>,
    pub disk_free_bytes: Option<u64>,
}

/// Thresholds separating healthy from unhealthy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceThresholds {
    pub max_cpu_percent: f32,
    pub max_memory_percent: f32,
    pub max_disk_percent: f32,
    pub min_free_disk_bytes: u64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self::from(&ResourcesConfig::default())
    }
}

impl From<&ResourcesConfig> for ResourceThresholds {
    fn from(config: &ResourcesConfig) -> Self {
        Self {
            max_cpu_percent: config.max_cpu_percent,
            max_memory_percent: config.max_memory_percent,
            max_disk_percent: config.max_disk_percent,
            min_free_disk_bytes: config.min_free_disk_gb.saturating_mul(GIB),
        }
    }
}

/// Verdict for a snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceHealth {
    pub healthy: bool,
    pub warnings: Vec<String>,
}

impl ResourceSnapshot {
    /// Unknown disk readings are skipped, not counted against health.
    pub fn assess(&self, thresholds: &ResourceThresholds) -> ResourceHealth {
        let mut warnings = Vec::new();
        let mut healthy = true;

        if self.cpu_percent >= thresholds.max_cpu_percent {
            healthy = false;
            warnings.push(format!("CPU usage critical: {:.1}%", self.cpu_percent));
        } else if self.cpu_percent > WARN_PERCENT {
            warnings.push(format!("High CPU usage: {:.1}%", self.cpu_percent));
        }

        if self.memory_percent >= thresholds.max_memory_percent {
            healthy = false;
            warnings.push(format!("Memory usage critical: {:.1}%", self.memory_percent));
        } else if self.memory_percent > WARN_PERCENT {
            warnings.push(format!("High memory usage: {:.1}%", self.memory_percent));
        }

        if let Some(free) = self.disk_free_bytes {
            if free < thresholds.min_free_disk_bytes {
                healthy = false;
                warnings.push(format!(
                    "Low disk space: {}GB free, at least {}GB recommended",
                    free / GIB,
                    thresholds.min_free_disk_bytes / GIB
                ));
            }
        }

        if let Some(percent) = self.disk_percent {
            if percent > thresholds.max_disk_percent {
                warnings.push(format!("High disk usage: {:.1}%", percent));
            }
        }

        ResourceHealth { healthy, warnings }
    }
}

/// Source of resource snapshots.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSnapshot;
}

/// Probe backed by `sysinfo` for CPU/memory and `fs2` for disk space.
///
/// The `System` is kept between samples; CPU usage is computed from the
/// difference between two refreshes at least
/// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] apart. Use [`SystemProbe::warmed`]
/// when the first sample has to be meaningful.
pub struct SystemProbe {
    system: Mutex<System>,
    disk_path: PathBuf,
    disk_error_logged: AtomicBool,
}

impl SystemProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            disk_path: disk_path.into(),
            disk_error_logged: AtomicBool::new(false),
        }
    }

    /// A probe whose first CPU reading already spans a full update interval.
    pub async fn warmed(disk_path: impl Into<PathBuf>) -> Self {
        let probe = Self::new(disk_path);
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        probe
    }

    fn disk_usage(&self) -> Option<(u64, f32)> {
        let usage = fs2::available_space(&self.disk_path)
            .and_then(|free| fs2::total_space(&self.disk_path).map(|total| (free, total)));
        match usage {
            Ok((free, total)) => {
                let percent = if total == 0 {
                    0.0
                } else {
                    (total.saturating_sub(free) as f64 / total as f64 * 100.0) as f32
                };
                Some((free, percent))
            }
            Err(e) => {
                if !self.disk_error_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Cannot read disk usage of {}: {}",
                        self.disk_path.display(),
                        e
                    );
                }
                None
            }
        }
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ResourceSnapshot {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();
            let total = system.total_memory();
            let memory_percent = if total == 0 {
                0.0
            } else {
                (system.used_memory() as f64 / total as f64 * 100.0) as f32
            };
            (system.global_cpu_info().cpu_usage(), memory_percent)
        };

        let disk = self.disk_usage();
        ResourceSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent: disk.map(|(_, percent)| percent),
            disk_free_bytes: disk.map(|(free, _)| free),
        }
    }
}

/// Log a snapshot and its verdict.
pub fn log_snapshot(snapshot: &ResourceSnapshot, thresholds: &ResourceThresholds) -> ResourceHealth {
    let health = snapshot.assess(thresholds);
    tracing::info!(
        cpu = %format!("{:.1}%", snapshot.cpu_percent),
        memory = %format!("{:.1}%", snapshot.memory_percent),
        disk = %snapshot
            .disk_percent
            .map_or_else(|| "unknown".to_string(), |p| format!("{:.1}%", p)),
        "Resource check"
    );
    for warning in &health.warnings {
        tracing::warn!("{}", warning);
    }
    health
}
