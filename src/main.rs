mod aggregator;
mod collectors;
mod config;
mod format;
mod http;
mod metrics;
mod probe;
mod snapshot;
mod store;

use aggregator::{now_unix_ms, Aggregator};
use axum::serve;
use clap::Parser;
use collectors::system::collect_identity;
use config::Config;
use metrics::Metrics;
use probe::SystemProbe;
use snapshot::Snapshot;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::SnapshotStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostpulse")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind address, overrides `listen` from the config.
    #[arg(long)]
    listen: Option<String>,
    /// Bind port, keeps the host part of `listen`.
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        services = cfg.services.len(),
        "запуск hostpulse"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let identity = tokio::task::spawn_blocking(collect_identity)
        .await
        .unwrap_or_default();
    let store = Arc::new(SnapshotStore::new(Snapshot::placeholder(
        identity,
        now_unix_ms(),
    )));

    // Binding happens before any task starts: a port we cannot bind is fatal.
    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, %addr, "не удалось открыть порт HTTP-сервера");
            std::process::exit(1);
        }
    };
    info!(%addr, "HTTP-сервер слушает");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = http::build_router(metrics.clone(), store.clone(), cfg.metrics_endpoint);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let collector_task = {
        let probe = Arc::new(SystemProbe::new(cfg.probe_timeout()));
        let aggregator = Arc::new(Aggregator::new(
            collectors::default_collectors(&cfg, probe),
            store,
            metrics,
            cfg.collector_timeout(),
            cfg.cycle_timeout(),
        ));
        tokio::spawn(aggregator.run(Duration::from_secs(cfg.interval_secs), shutdown_rx))
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    let _ = http_task.await;
}

fn load_config(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(listen) = &cli.listen {
        cfg.listen = listen.clone();
    }
    if let Some(port) = cli.port {
        cfg.set_port(port)?;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
