use async_trait::async_trait;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};
use tracing::{instrument, trace};

use super::{CollectionError, Collector, PartialSnapshot};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Run a blocking sysinfo read off the async workers.
async fn sample<F>(name: &'static str, f: F) -> Result<PartialSnapshot, CollectionError>
where
    F: FnOnce() -> Result<PartialSnapshot, String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CollectionError::failed(name, e.to_string()))?
        .map_err(|message| CollectionError::failed(name, message))
}

/// Global CPU usage across all cores
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuCollector;

#[async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    #[instrument(skip_all)]
    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        sample("cpu", || {
            let mut sys = System::new();
            // usage is a delta between two refreshes
            sys.refresh_cpu_usage();
            std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_cpu_usage();

            if sys.cpus().is_empty() {
                return Err("no CPUs reported".to_string());
            }
            let usage = f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0);
            trace!("cpu usage: {usage:.1}%");
            Ok(PartialSnapshot {
                cpu_percent: Some(usage),
                ..Default::default()
            })
        })
        .await
    }
}

/// Memory usage and available memory
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCollector;

pub(crate) fn memory_usage(total: u64, available: u64) -> Option<(f64, f64)> {
    if total == 0 {
        return None;
    }
    let available = available.min(total);
    let percent = (total - available) as f64 / total as f64 * 100.0;
    Some((percent, available as f64 / BYTES_PER_GB))
}

#[async_trait]
impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    #[instrument(skip_all)]
    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        sample("memory", || {
            let mut sys = System::new();
            sys.refresh_memory();

            let (percent, available_gb) =
                memory_usage(sys.total_memory(), sys.available_memory())
                    .ok_or_else(|| "total memory reported as zero".to_string())?;
            trace!("memory usage: {percent:.1}%, {available_gb:.2} GB available");
            Ok(PartialSnapshot {
                memory_percent: Some(percent),
                memory_available_gb: Some(available_gb),
                ..Default::default()
            })
        })
        .await
    }
}

/// Mean usage across all mounted volumes
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskCollector;

pub(crate) fn mean_disk_usage(volumes: impl IntoIterator<Item = (u64, u64)>) -> Option<f64> {
    let usages: Vec<f64> = volumes
        .into_iter()
        .filter(|(total, _)| *total > 0)
        .map(|(total, available)| {
            let available = available.min(total);
            (total - available) as f64 / total as f64 * 100.0
        })
        .collect();

    if usages.is_empty() {
        return None;
    }
    Some(usages.iter().sum::<f64>() / usages.len() as f64)
}

#[async_trait]
impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    #[instrument(skip_all)]
    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        sample("disk", || {
            let disks = Disks::new_with_refreshed_list();
            let usage = mean_disk_usage(
                disks
                    .iter()
                    .map(|disk| (disk.total_space(), disk.available_space())),
            )
            .ok_or_else(|| "no mounted volumes reported".to_string())?;

            trace!("mean disk usage over {} volumes: {usage:.1}%", disks.len());
            Ok(PartialSnapshot {
                disk_usage_percent: Some(usage),
                ..Default::default()
            })
        })
        .await
    }
}
