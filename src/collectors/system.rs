use super::{blocking, escape_html, CollectError, Collector, CollectorResult};
use crate::format::{format_bytes, format_uptime, percent};
use crate::snapshot::{CpuFragment, DiskEntry, Fragment, MemoryFragment, SystemIdentity};
use futures_util::future::BoxFuture;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::sync::Mutex;

pub fn collect_identity() -> SystemIdentity {
    let system = System::new();
    let uptime_seconds = system.uptime();
    let platform = fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|text| parse_pretty_name(&text))
        .or_else(|| system.long_os_version())
        .unwrap_or_else(|| "Unknown".to_string());

    SystemIdentity {
        hostname: escape_html(&system.host_name().unwrap_or_else(|| "unknown".to_string())),
        platform: escape_html(&platform),
        kernel: escape_html(&system.kernel_version().unwrap_or_default()),
        architecture: std::env::consts::ARCH.to_string(),
        uptime: format_uptime(uptime_seconds),
        uptime_seconds,
    }
}

fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.strip_prefix("PRETTY_NAME=")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

pub struct CpuCollector {
    system: Arc<Mutex<System>>,
    sample: Duration,
}

impl CpuCollector {
    pub fn new(sample: Duration) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            sample,
        }
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        super::CPU
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let system = self.system.clone();
        let sample = self.sample;
        Box::pin(async move {
            blocking(move || {
                let mut system = system.blocking_lock();
                system.refresh_cpu();
                // The only intentionally blocking step of a cycle.
                std::thread::sleep(sample);
                system.refresh_cpu();
                Ok(Fragment::Cpu(cpu_fragment(&system)))
            })
            .await
            .into()
        })
    }
}

fn cpu_fragment(system: &System) -> CpuFragment {
    let per_core: Vec<f64> = system
        .cpus()
        .iter()
        .map(|c| c.cpu_usage() as f64)
        .collect();
    let overall = if per_core.is_empty() {
        0.0
    } else {
        per_core.iter().sum::<f64>() / per_core.len() as f64
    };
    let load = system.load_average();

    CpuFragment {
        overall,
        core_count: per_core.len(),
        per_core,
        load_avg: [load.one, load.five, load.fifteen],
        brand: system
            .cpus()
            .first()
            .map(|c| escape_html(c.brand().trim()))
            .filter(|b| !b.is_empty()),
    }
}

pub struct MemoryCollector {
    system: Arc<Mutex<System>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &'static str {
        super::MEMORY
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let system = self.system.clone();
        Box::pin(async move {
            blocking(move || {
                let mut system = system.blocking_lock();
                system.refresh_memory();
                Ok(Fragment::Memory(memory_fragment(
                    system.total_memory(),
                    system.used_memory(),
                    system.available_memory(),
                    system.total_swap(),
                    system.used_swap(),
                )))
            })
            .await
            .into()
        })
    }
}

fn memory_fragment(
    total: u64,
    used: u64,
    available: u64,
    swap_total: u64,
    swap_used: u64,
) -> MemoryFragment {
    MemoryFragment {
        total_bytes: total,
        used_bytes: used,
        free_bytes: available,
        percent: percent(total.saturating_sub(available) as f64, total as f64),
        swap_total_bytes: swap_total,
        swap_used_bytes: swap_used,
        swap_free_bytes: swap_total.saturating_sub(swap_used),
        swap_percent: percent(swap_used as f64, swap_total as f64),
        total: format_bytes(total),
        used: format_bytes(used),
        free: format_bytes(available),
        swap_total: format_bytes(swap_total),
        swap_used: format_bytes(swap_used),
    }
}

pub struct DiskCollector {
    system: Arc<Mutex<System>>,
    excluded_mounts: Arc<Vec<String>>,
}

impl DiskCollector {
    pub fn new(excluded_mounts: Vec<String>) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            excluded_mounts: Arc::new(excluded_mounts),
        }
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &'static str {
        super::DISK
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let system = self.system.clone();
        let excluded = self.excluded_mounts.clone();
        Box::pin(async move {
            blocking(move || {
                let mut system = system.blocking_lock();
                system.refresh_disks_list();
                let entries = system
                    .disks()
                    .iter()
                    .filter_map(|d| {
                        disk_entry(
                            &d.mount_point().to_string_lossy(),
                            &d.name().to_string_lossy(),
                            &String::from_utf8_lossy(d.file_system()),
                            d.total_space(),
                            d.available_space(),
                            &excluded,
                        )
                    })
                    .collect();
                Ok::<_, CollectError>(Fragment::Disk(entries))
            })
            .await
            .into()
        })
    }
}

fn disk_entry(
    mount: &str,
    device: &str,
    fstype: &str,
    total: u64,
    available: u64,
    excluded: &[String],
) -> Option<DiskEntry> {
    if excluded.iter().any(|m| m == mount) || total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(DiskEntry {
        mountpoint: escape_html(mount),
        device: escape_html(device),
        fstype: escape_html(fstype),
        total_bytes: total,
        used_bytes: used,
        free_bytes: available,
        percent: percent(used as f64, total as f64),
        total: format_bytes(total),
        used: format_bytes(used),
        free: format_bytes(available),
    })
}
