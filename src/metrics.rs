use crate::snapshot::Snapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub hostpulse_cycles_total: Counter,
    pub hostpulse_cycle_duration_seconds: Gauge,
    pub hostpulse_last_publish_timestamp_seconds: Gauge,
    pub hostpulse_snapshot_fragments: Gauge,
    pub hostpulse_collector_results_total: CounterVec,
    pub hostpulse_api_requests_total: CounterVec,
    pub hostpulse_scrape_count_total: Counter,
    pub hostpulse_cpu_usage_percent: Gauge,
    pub hostpulse_memory_usage_percent: Gauge,
    pub hostpulse_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let hostpulse_cycles_total = Counter::with_opts(opts!(
            "hostpulse_cycles_total",
            "Number of published collection cycles"
        ))?;
        let hostpulse_cycle_duration_seconds = Gauge::with_opts(opts!(
            "hostpulse_cycle_duration_seconds",
            "Wall time of the last collection cycle in seconds"
        ))?;
        let hostpulse_last_publish_timestamp_seconds = Gauge::with_opts(opts!(
            "hostpulse_last_publish_timestamp_seconds",
            "Unix time of the last published snapshot"
        ))?;
        let hostpulse_snapshot_fragments = Gauge::with_opts(opts!(
            "hostpulse_snapshot_fragments",
            "Number of fragments present in the last snapshot"
        ))?;
        let hostpulse_collector_results_total = CounterVec::new(
            opts!(
                "hostpulse_collector_results_total",
                "Collector outcomes by collector and outcome (ok, failed, timed_out)"
            ),
            &["collector", "outcome"],
        )?;
        let hostpulse_api_requests_total = CounterVec::new(
            opts!("hostpulse_api_requests_total", "HTTP requests by path"),
            &["path"],
        )?;
        let hostpulse_scrape_count_total = Counter::with_opts(opts!(
            "hostpulse_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let hostpulse_cpu_usage_percent = Gauge::with_opts(opts!(
            "hostpulse_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let hostpulse_memory_usage_percent = Gauge::with_opts(opts!(
            "hostpulse_memory_usage_percent",
            "Physical memory usage in percent"
        ))?;
        let hostpulse_uptime_seconds =
            Gauge::with_opts(opts!("hostpulse_uptime_seconds", "Host uptime in seconds"))?;

        register(&registry, &hostpulse_cycles_total)?;
        register(&registry, &hostpulse_cycle_duration_seconds)?;
        register(&registry, &hostpulse_last_publish_timestamp_seconds)?;
        register(&registry, &hostpulse_snapshot_fragments)?;
        register(&registry, &hostpulse_collector_results_total)?;
        register(&registry, &hostpulse_api_requests_total)?;
        register(&registry, &hostpulse_scrape_count_total)?;
        register(&registry, &hostpulse_cpu_usage_percent)?;
        register(&registry, &hostpulse_memory_usage_percent)?;
        register(&registry, &hostpulse_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            hostpulse_cycles_total,
            hostpulse_cycle_duration_seconds,
            hostpulse_last_publish_timestamp_seconds,
            hostpulse_snapshot_fragments,
            hostpulse_collector_results_total,
            hostpulse_api_requests_total,
            hostpulse_scrape_count_total,
            hostpulse_cpu_usage_percent,
            hostpulse_memory_usage_percent,
            hostpulse_uptime_seconds,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        self.hostpulse_cycles_total.inc();
        self.hostpulse_cycle_duration_seconds
            .set(snapshot.duration_ms as f64 / 1000.0);
        self.hostpulse_last_publish_timestamp_seconds
            .set(snapshot.taken_at as f64);
        self.hostpulse_snapshot_fragments
            .set(snapshot.fragment_count() as f64);
        self.hostpulse_uptime_seconds
            .set(snapshot.system.uptime_seconds as f64);

        // Absent fragments leave the previous value in place.
        if let Some(cpu) = &snapshot.cpu {
            self.hostpulse_cpu_usage_percent.set(cpu.overall);
        }
        if let Some(memory) = &snapshot.memory {
            self.hostpulse_memory_usage_percent.set(memory.percent);
        }
    }

    pub fn record_collector(&self, collector: &str, outcome: &str) {
        self.hostpulse_collector_results_total
            .with_label_values(&[collector, outcome])
            .inc();
    }

    pub fn inc_api_request(&self, path: &str) {
        self.hostpulse_api_requests_total
            .with_label_values(&[path])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.hostpulse_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
