use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub taken_at: i64,
    pub taken_at_ms: i64,
    pub timestamp: String,
    pub cycle: u64,
    pub duration_ms: u64,
    pub system: SystemIdentity,
    pub cpu: Option<CpuFragment>,
    pub memory: Option<MemoryFragment>,
    pub disk: Option<Vec<DiskEntry>>,
    #[serde(rename = "diskIO")]
    pub disk_io: Option<DiskIoFragment>,
    pub network: Option<NetworkFragment>,
    pub connections: Option<ConnectionsFragment>,
    pub processes: Option<Vec<ProcessEntry>>,
    pub services: Option<BTreeMap<String, ServiceState>>,
    pub vpn: Option<VpnFragment>,
    pub firewall: Option<FirewallFragment>,
    pub logins: Option<Vec<LoginRecord>>,
    pub collector_errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemIdentity {
    pub hostname: String,
    pub platform: String,
    pub kernel: String,
    pub architecture: String,
    pub uptime: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuFragment {
    pub overall: f64,
    pub per_core: Vec<f64>,
    pub core_count: usize,
    pub load_avg: [f64; 3],
    pub brand: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFragment {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent: f64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_free_bytes: u64,
    pub swap_percent: f64,
    pub total: String,
    pub used: String,
    pub free: String,
    pub swap_total: String,
    pub swap_used: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskEntry {
    pub mountpoint: String,
    pub device: String,
    pub fstype: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent: f64,
    pub total: String,
    pub used: String,
    pub free: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskIoFragment {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub read: String,
    pub write: String,
    pub rates: Option<DiskIoRates>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskIoRates {
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub read_ops_per_sec: f64,
    pub write_ops_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFragment {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
    pub drops_in: u64,
    pub drops_out: u64,
    pub sent: String,
    pub recv: String,
    pub rates: Option<NetworkRates>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRates {
    pub sent_bytes_per_sec: f64,
    pub recv_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsFragment {
    pub established: u64,
    pub listen: u64,
    pub time_wait: u64,
    pub total: u64,
    pub access_denied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub user: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnFragment {
    pub installed: bool,
    pub running: bool,
    pub interface: String,
    pub peers: Vec<VpnPeer>,
    pub peer_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnPeer {
    pub public_key_prefix: String,
    pub endpoint_masked: Option<String>,
    pub last_handshake: Option<String>,
    pub transfer_stats: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallFragment {
    pub active: bool,
    pub open_ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRecord {
    pub user: String,
    pub terminal: String,
    pub date: String,
}

#[derive(Debug, Clone)]
pub enum Fragment {
    Cpu(CpuFragment),
    Memory(MemoryFragment),
    Disk(Vec<DiskEntry>),
    DiskIo(DiskIoFragment),
    Network(NetworkFragment),
    Connections(ConnectionsFragment),
    Processes(Vec<ProcessEntry>),
    Services(BTreeMap<String, ServiceState>),
    Vpn(VpnFragment),
    Firewall(FirewallFragment),
    Logins(Vec<LoginRecord>),
}

impl Snapshot {
    pub fn new(system: SystemIdentity, cycle: u64, taken_at_ms: i64) -> Self {
        Self {
            taken_at: taken_at_ms.div_euclid(1000),
            taken_at_ms,
            timestamp: format_rfc3339(taken_at_ms),
            cycle,
            duration_ms: 0,
            system,
            cpu: None,
            memory: None,
            disk: None,
            disk_io: None,
            network: None,
            connections: None,
            processes: None,
            services: None,
            vpn: None,
            firewall: None,
            logins: None,
            collector_errors: BTreeMap::new(),
            error: None,
        }
    }

    pub fn placeholder(system: SystemIdentity, now_ms: i64) -> Self {
        let mut snapshot = Self::new(system, 0, now_ms);
        snapshot.error = Some("первый цикл сбора ещё не завершён".to_string());
        snapshot
    }

    pub fn apply(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Cpu(v) => self.cpu = Some(v),
            Fragment::Memory(v) => self.memory = Some(v),
            Fragment::Disk(v) => self.disk = Some(v),
            Fragment::DiskIo(v) => self.disk_io = Some(v),
            Fragment::Network(v) => self.network = Some(v),
            Fragment::Connections(v) => self.connections = Some(v),
            Fragment::Processes(v) => self.processes = Some(v),
            Fragment::Services(v) => self.services = Some(v),
            Fragment::Vpn(v) => self.vpn = Some(v),
            Fragment::Firewall(v) => self.firewall = Some(v),
            Fragment::Logins(v) => self.logins = Some(v),
        }
    }

    pub fn fragment_count(&self) -> usize {
        [
            self.cpu.is_some(),
            self.memory.is_some(),
            self.disk.is_some(),
            self.disk_io.is_some(),
            self.network.is_some(),
            self.connections.is_some(),
            self.processes.is_some(),
            self.services.is_some(),
            self.vpn.is_some(),
            self.firewall.is_some(),
            self.logins.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    pub fn derive_rates(&mut self, previous: &Snapshot) {
        let dt = (self.taken_at_ms - previous.taken_at_ms) as f64 / 1000.0;
        if dt <= 0.0 {
            return;
        }

        if let (Some(net), Some(prev)) = (self.network.as_mut(), previous.network.as_ref()) {
            net.rates = Some(NetworkRates {
                sent_bytes_per_sec: per_sec(net.bytes_sent, prev.bytes_sent, dt),
                recv_bytes_per_sec: per_sec(net.bytes_recv, prev.bytes_recv, dt),
            });
        }

        if let (Some(io), Some(prev)) = (self.disk_io.as_mut(), previous.disk_io.as_ref()) {
            io.rates = Some(DiskIoRates {
                read_bytes_per_sec: per_sec(io.read_bytes, prev.read_bytes, dt),
                write_bytes_per_sec: per_sec(io.write_bytes, prev.write_bytes, dt),
                read_ops_per_sec: per_sec(io.read_count, prev.read_count, dt),
                write_ops_per_sec: per_sec(io.write_count, prev.write_count, dt),
            });
        }
    }
}

fn per_sec(current: u64, previous: u64, dt_secs: f64) -> f64 {
    current.saturating_sub(previous) as f64 / dt_secs
}

fn format_rfc3339(unix_ms: i64) -> String {
    let st = std::time::UNIX_EPOCH + std::time::Duration::from_millis(unix_ms.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(sent: u64, recv: u64) -> NetworkFragment {
        NetworkFragment {
            bytes_sent: sent,
            bytes_recv: recv,
            packets_sent: 0,
            packets_recv: 0,
            errors_in: 0,
            errors_out: 0,
            drops_in: 0,
            drops_out: 0,
            sent: String::new(),
            recv: String::new(),
            rates: None,
        }
    }

    #[test]
    fn apply_fills_matching_section_only() {
        let mut s = Snapshot::new(SystemIdentity::default(), 1, 0);
        assert_eq!(s.fragment_count(), 0);
        s.apply(Fragment::Firewall(FirewallFragment::default()));
        s.apply(Fragment::Logins(Vec::new()));
        assert_eq!(s.fragment_count(), 2);
        assert!(s.firewall.is_some());
        assert!(s.cpu.is_none());
    }

    #[test]
    fn rates_use_previous_counters() {
        let mut prev = Snapshot::new(SystemIdentity::default(), 1, 10_000);
        prev.network = Some(network(1000, 4000));
        let mut cur = Snapshot::new(SystemIdentity::default(), 2, 12_000);
        cur.network = Some(network(3000, 5000));
        cur.derive_rates(&prev);

        let rates = cur.network.as_ref().and_then(|n| n.rates.as_ref()).expect("rates");
        assert_eq!(rates.sent_bytes_per_sec, 1000.0);
        assert_eq!(rates.recv_bytes_per_sec, 500.0);
    }

    #[test]
    fn counter_reset_saturates_to_zero() {
        let mut prev = Snapshot::new(SystemIdentity::default(), 1, 0);
        prev.network = Some(network(9000, 9000));
        let mut cur = Snapshot::new(SystemIdentity::default(), 2, 1000);
        cur.network = Some(network(10, 10));
        cur.derive_rates(&prev);
        let rates = cur.network.unwrap().rates.unwrap();
        assert_eq!(rates.sent_bytes_per_sec, 0.0);
    }

    #[test]
    fn no_rates_without_previous_fragment() {
        let prev = Snapshot::new(SystemIdentity::default(), 1, 0);
        let mut cur = Snapshot::new(SystemIdentity::default(), 2, 1000);
        cur.network = Some(network(10, 10));
        cur.derive_rates(&prev);
        assert!(cur.network.unwrap().rates.is_none());
    }

    #[test]
    fn serializes_with_camel_case_contract_names() {
        let mut s = Snapshot::new(SystemIdentity::default(), 3, 1_700_000_000_000);
        s.collector_errors
            .insert("vpn".to_string(), "таймаут".to_string());
        let json = serde_json::to_value(&s).expect("json");
        assert_eq!(json["takenAt"], 1_700_000_000);
        assert!(json.get("diskIO").is_some());
        assert_eq!(json["collectorErrors"]["vpn"], "таймаут");
        assert!(json.get("error").is_none());
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn service_state_serializes_lowercase() {
        let v = serde_json::to_value(ServiceState::Inactive).unwrap();
        assert_eq!(v, "inactive");
    }
}
