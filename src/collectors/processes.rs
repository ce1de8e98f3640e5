use super::{blocking, escape_html, Collector, CollectorResult};
use crate::format::percent;
use crate::snapshot::{Fragment, ProcessEntry};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use sysinfo::{PidExt, ProcessExt, ProcessRefreshKind, System, SystemExt, UserExt};
use tokio::sync::Mutex;

const TOP_N: usize = 10;

pub struct ProcessCollector {
    system: Arc<Mutex<System>>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessRefreshKind::new().with_cpu());
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &'static str {
        super::PROCESSES
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let system = self.system.clone();
        Box::pin(async move {
            blocking(move || {
                let mut system = system.blocking_lock();
                system.refresh_memory();
                system.refresh_users_list();
                system.refresh_processes_specifics(
                    ProcessRefreshKind::new().with_cpu().with_user(),
                );

                let total_memory = system.total_memory() as f64;
                let mut entries: Vec<ProcessEntry> = system
                    .processes()
                    .iter()
                    .map(|(pid, process)| {
                        let user = process
                            .user_id()
                            .and_then(|uid| system.get_user_by_id(uid))
                            .map(|u| u.name().to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        ProcessEntry {
                            pid: pid.as_u32(),
                            name: escape_html(process.name()),
                            user: escape_html(&user),
                            cpu_percent: process.cpu_usage() as f64,
                            mem_percent: percent(process.memory() as f64, total_memory),
                        }
                    })
                    .collect();
                // HashMap order is random; ties must break the same way every cycle.
                entries.sort_by_key(|e| e.pid);
                Ok(Fragment::Processes(top_processes(entries)))
            })
            .await
            .into()
        })
    }
}

fn top_processes(mut entries: Vec<ProcessEntry>) -> Vec<ProcessEntry> {
    entries.retain(|e| e.cpu_percent > 0.0);
    entries.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    entries.truncate(TOP_N);
    entries
}
