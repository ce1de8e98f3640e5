use crate::collectors::system::collect_identity;
use crate::collectors::{Collector, CollectorResult};
use crate::metrics::Metrics;
use crate::snapshot::{Snapshot, SystemIdentity};
use crate::store::SnapshotStore;
use futures_util::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Collecting,
    Merging,
    Published,
}

impl CyclePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CyclePhase::Collecting,
            2 => CyclePhase::Merging,
            3 => CyclePhase::Published,
            _ => CyclePhase::Idle,
        }
    }
}

type IdentityFn = Arc<dyn Fn() -> SystemIdentity + Send + Sync>;

pub struct Aggregator {
    collectors: Vec<Arc<dyn Collector>>,
    store: Arc<SnapshotStore>,
    metrics: Arc<Metrics>,
    collector_timeout: Duration,
    cycle_timeout: Duration,
    identity: IdentityFn,
    cycles: AtomicU64,
    phase: AtomicU8,
    cycle_lock: Mutex<()>,
}

impl Aggregator {
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        store: Arc<SnapshotStore>,
        metrics: Arc<Metrics>,
        collector_timeout: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            collectors,
            store,
            metrics,
            collector_timeout,
            cycle_timeout,
            identity: Arc::new(collect_identity),
            cycles: AtomicU64::new(0),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_identity<F>(mut self, identity: F) -> Self
    where
        F: Fn() -> SystemIdentity + Send + Sync + 'static,
    {
        self.identity = Arc::new(identity);
        self
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(phase = ?self.phase(), "получен сигнал остановки цикла сбора");
                    break;
                }
                _ = ticker.tick() => {}
            }
            // An in-flight cycle is dropped on shutdown; its JoinSet aborts the collectors.
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(phase = ?self.phase(), "получен сигнал остановки во время цикла сбора");
                    break;
                }
                _ = self.run_cycle() => {}
            }
        }
    }

    pub async fn run_cycle(&self) -> Arc<Snapshot> {
        let _cycle = self.cycle_lock.lock().await;
        let started = std::time::Instant::now();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        self.set_phase(CyclePhase::Collecting);
        debug!(cycle, collectors = self.collectors.len(), "начат цикл сбора");
        let identity = {
            let identity = self.identity.clone();
            tokio::task::spawn_blocking(move || identity())
        };
        let results = self.collect_all().await;

        self.set_phase(CyclePhase::Merging);
        let identity = match identity.await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "не удалось определить параметры системы");
                self.store.get().await.system.clone()
            }
        };
        let mut snapshot = Snapshot::new(identity, cycle, now_unix_ms());
        for (name, result) in results {
            match result {
                CollectorResult::Ok(fragment) => {
                    self.metrics.record_collector(name, "ok");
                    snapshot.apply(fragment);
                }
                CollectorResult::Failed(reason) => {
                    warn!(collector = name, error = %reason, "сборщик завершился с ошибкой");
                    self.metrics.record_collector(name, "failed");
                    snapshot.collector_errors.insert(name.to_string(), reason);
                }
                CollectorResult::TimedOut => {
                    warn!(collector = name, "сборщик не уложился в отведённое время");
                    self.metrics.record_collector(name, "timed_out");
                    snapshot
                        .collector_errors
                        .insert(name.to_string(), "превышено время ожидания".to_string());
                }
            }
        }
        if snapshot.fragment_count() == 0 {
            warn!(cycle, "ни один сборщик не вернул данных");
            snapshot.error = Some("ни один сборщик не вернул данных".to_string());
        }
        snapshot.duration_ms = started.elapsed().as_millis() as u64;

        let published = self.store.publish(snapshot).await;
        self.metrics.update_from_snapshot(&published);
        self.set_phase(CyclePhase::Published);
        debug!(
            cycle,
            duration_ms = published.duration_ms,
            fragments = published.fragment_count(),
            errors = published.collector_errors.len(),
            "снимок опубликован"
        );
        published
    }

    // Every registered collector yields exactly one result.
    async fn collect_all(&self) -> Vec<(&'static str, CollectorResult)> {
        let deadline = Instant::now() + self.cycle_timeout;
        let mut pending: BTreeSet<&'static str> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for collector in &self.collectors {
            pending.insert(collector.name());
            let collector = collector.clone();
            let timeout = self.collector_timeout;
            tasks.spawn(async move {
                let name = collector.name();
                let run = AssertUnwindSafe(async { collector.collect().await }).catch_unwind();
                let result = match time::timeout(timeout, run).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => CollectorResult::Failed("сборщик аварийно завершился".to_string()),
                    Err(_) => CollectorResult::TimedOut,
                };
                (name, result)
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        loop {
            match time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((name, result)))) => {
                    pending.remove(name);
                    results.push((name, result));
                }
                Ok(Some(Err(err))) => warn!(error = %err, "задача сборщика прервана"),
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = pending.len(), "истёк общий бюджет цикла сбора");
                    tasks.abort_all();
                    break;
                }
            }
        }
        results.extend(pending.into_iter().map(|name| (name, CollectorResult::TimedOut)));
        results
    }
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
