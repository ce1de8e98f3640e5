pub mod logins;
pub mod processes;
pub mod procfs;
pub mod services;
pub mod system;
pub mod vpn;

use crate::config::Config;
use crate::probe::{ProbeError, ProbeRunner};
use crate::snapshot::Fragment;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const DISK: &str = "disk";
pub const DISK_IO: &str = "disk_io";
pub const NETWORK: &str = "network";
pub const CONNECTIONS: &str = "connections";
pub const PROCESSES: &str = "processes";
pub const SERVICES: &str = "services";
pub const VPN: &str = "vpn";
pub const FIREWALL: &str = "firewall";
pub const LOGINS: &str = "logins";

#[derive(Debug)]
pub enum CollectorResult {
    Ok(Fragment),
    Failed(String),
    TimedOut,
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("доступ запрещён: {0}")]
    PermissionDenied(String),
    #[error("ошибка разбора: {0}")]
    Parse(String),
    #[error("ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),
    #[error("не поддерживается на этой платформе")]
    Unsupported,
    #[error("фоновая задача сбора прервана: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<Result<Fragment, CollectError>> for CollectorResult {
    fn from(value: Result<Fragment, CollectError>) -> Self {
        match value {
            Ok(fragment) => CollectorResult::Ok(fragment),
            Err(CollectError::Probe(ProbeError::TimedOut { .. })) => CollectorResult::TimedOut,
            Err(err) => CollectorResult::Failed(err.to_string()),
        }
    }
}

pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    fn collect(&self) -> BoxFuture<'_, CollectorResult>;
}

pub(crate) async fn blocking<F>(f: F) -> Result<Fragment, CollectError>
where
    F: FnOnce() -> Result<Fragment, CollectError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

pub fn default_collectors(cfg: &Config, probe: Arc<dyn ProbeRunner>) -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(system::CpuCollector::new(cfg.cpu_sample())),
        Arc::new(system::MemoryCollector::new()),
        Arc::new(system::DiskCollector::new(cfg.disk.excluded_mounts.clone())),
        Arc::new(procfs::DiskIoCollector::new()),
        Arc::new(procfs::NetworkCollector::new()),
        Arc::new(procfs::ConnectionsCollector::new()),
        Arc::new(processes::ProcessCollector::new()),
        Arc::new(services::ServiceCollector::new(
            probe.clone(),
            cfg.services.clone(),
        )),
        Arc::new(vpn::VpnCollector::new(
            probe.clone(),
            cfg.vpn.interface.clone(),
            cfg.vpn.service.clone(),
        )),
        Arc::new(services::FirewallCollector::new(
            probe.clone(),
            cfg.firewall.service.clone(),
        )),
        Arc::new(logins::LoginCollector::new(probe)),
    ]
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
