use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_collector_timeout_ms")]
    pub collector_timeout_ms: u64,
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    #[serde(default)]
    pub vpn: VpnConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub metrics_endpoint: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VpnConfig {
    #[serde(default = "default_vpn_interface")]
    pub interface: String,
    #[serde(default = "default_vpn_service")]
    pub service: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallConfig {
    #[serde(default = "default_firewall_service")]
    pub service: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiskConfig {
    #[serde(default = "default_excluded_mounts")]
    pub excluded_mounts: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            cpu_sample_ms: default_cpu_sample_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            collector_timeout_ms: default_collector_timeout_ms(),
            cycle_timeout_ms: default_cycle_timeout_ms(),
            services: default_services(),
            vpn: VpnConfig::default(),
            firewall: FirewallConfig::default(),
            disk: DiskConfig::default(),
            metrics_endpoint: false,
        }
    }
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            interface: default_vpn_interface(),
            service: default_vpn_service(),
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            service: default_firewall_service(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            excluded_mounts: default_excluded_mounts(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs должно быть >= 1".to_string(),
            ));
        }

        validate_timeouts(self)?;
        validate_services(&self.services)?;

        if self.vpn.interface.trim().is_empty() || self.vpn.service.trim().is_empty() {
            return Err(ConfigError::Validation(
                "vpn.interface и vpn.service не должны быть пустыми".to_string(),
            ));
        }
        if self.firewall.service.trim().is_empty() {
            return Err(ConfigError::Validation(
                "firewall.service не должен быть пустым".to_string(),
            ));
        }

        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = SocketAddr::from_str(&self.listen).map_err(|_| {
            ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            )
        })?;
        addr.set_port(port);
        self.listen = addr.to_string();
        Ok(())
    }

    pub fn cpu_sample(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector_timeout_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_timeouts(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.probe_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "probe_timeout_ms должен быть > 0".to_string(),
        ));
    }
    if cfg.cpu_sample_ms == 0 {
        return Err(ConfigError::Validation(
            "cpu_sample_ms должен быть > 0".to_string(),
        ));
    }
    if cfg.cpu_sample_ms >= cfg.collector_timeout_ms {
        return Err(ConfigError::Validation(
            "cpu_sample_ms должен быть меньше collector_timeout_ms".to_string(),
        ));
    }
    if cfg.probe_timeout_ms >= cfg.collector_timeout_ms {
        return Err(ConfigError::Validation(
            "probe_timeout_ms должен быть меньше collector_timeout_ms".to_string(),
        ));
    }
    if cfg.collector_timeout_ms > cfg.cycle_timeout_ms {
        return Err(ConfigError::Validation(
            "collector_timeout_ms не должен превышать cycle_timeout_ms".to_string(),
        ));
    }
    Ok(())
}

fn validate_services(services: &[String]) -> Result<(), ConfigError> {
    if services.is_empty() {
        return Err(ConfigError::Validation(
            "список services не должен быть пустым".to_string(),
        ));
    }
    let mut names = HashSet::new();
    for name in services {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*] не должен быть пустым".to_string(),
            ));
        }
        if !names.insert(name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "имя сервиса '{}' должно быть уникальным",
                name
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

const fn default_interval_secs() -> u64 {
    3
}

const fn default_cpu_sample_ms() -> u64 {
    500
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

const fn default_collector_timeout_ms() -> u64 {
    8000
}

const fn default_cycle_timeout_ms() -> u64 {
    10_000
}

fn default_services() -> Vec<String> {
    vec![
        "sshd".to_string(),
        "firewalld".to_string(),
        "wg-quick@wg0".to_string(),
    ]
}

fn default_vpn_interface() -> String {
    "wg0".to_string()
}

fn default_vpn_service() -> String {
    "wg-quick@wg0".to_string()
}

fn default_firewall_service() -> String {
    "firewalld".to_string()
}

fn default_excluded_mounts() -> Vec<String> {
    vec!["/boot/efi".to_string(), "/dev".to_string(), "/run".to_string()]
}
