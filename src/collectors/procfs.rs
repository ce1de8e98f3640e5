use super::{blocking, CollectError, Collector, CollectorResult};
use crate::format::format_bytes;
use crate::snapshot::{ConnectionsFragment, DiskIoFragment, Fragment, NetworkFragment};
use futures_util::future::BoxFuture;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const SECTOR_BYTES: u64 = 512;

pub struct DiskIoCollector {
    root: PathBuf,
}

impl DiskIoCollector {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl Collector for DiskIoCollector {
    fn name(&self) -> &'static str {
        super::DISK_IO
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let path = self.root.join("diskstats");
        Box::pin(async move {
            blocking(move || {
                let text = read_proc(&path)?;
                Ok(Fragment::DiskIo(parse_diskstats(&text, is_whole_disk)))
            })
            .await
            .into()
        })
    }
}

// Whole disks only; partitions would count traffic twice.
fn parse_diskstats(text: &str, is_disk: impl Fn(&str) -> bool) -> DiskIoFragment {
    let (mut read_count, mut read_sectors, mut write_count, mut write_sectors) = (0, 0, 0, 0);
    for line in text.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        // 2 name, 3 reads completed, 5 sectors read, 7 writes completed, 9 sectors written
        if parts.len() < 10 || !is_disk(parts[2]) {
            continue;
        }
        let field = |i: usize| parts[i].parse::<u64>().unwrap_or(0);
        read_count += field(3);
        read_sectors += field(5);
        write_count += field(7);
        write_sectors += field(9);
    }

    let read_bytes = read_sectors * SECTOR_BYTES;
    let write_bytes = write_sectors * SECTOR_BYTES;
    DiskIoFragment {
        read_bytes,
        write_bytes,
        read_count,
        write_count,
        read: format_bytes(read_bytes),
        write: format_bytes(write_bytes),
        rates: None,
    }
}

fn is_whole_disk(name: &str) -> bool {
    if name.starts_with("loop") || name.starts_with("ram") {
        return false;
    }
    if Path::new("/sys/block").join(name).exists() {
        return true;
    }
    looks_like_whole_disk(name)
}

fn looks_like_whole_disk(name: &str) -> bool {
    let bytes = name.as_bytes();
    let letter_suffix = |prefix: &str| {
        name.len() == prefix.len() + 1
            && name.starts_with(prefix)
            && bytes[prefix.len()].is_ascii_alphabetic()
    };
    letter_suffix("sd")
        || letter_suffix("vd")
        || letter_suffix("hd")
        || letter_suffix("xvd")
        || (name.starts_with("nvme") && !name.contains('p'))
        || (name.starts_with("mmcblk") && !name.contains('p'))
}

pub struct NetworkCollector {
    root: PathBuf,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &'static str {
        super::NETWORK
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let path = self.root.join("net/dev");
        Box::pin(async move {
            blocking(move || {
                let text = read_proc(&path)?;
                parse_net_dev(&text).map(Fragment::Network)
            })
            .await
            .into()
        })
    }
}

fn parse_net_dev(text: &str) -> Result<NetworkFragment, CollectError> {
    let mut totals = [0_u64; 16];
    let mut interfaces = 0;
    // First two lines are headers.
    for line in text.lines().skip(2) {
        let Some((_iface, rest)) = line.split_once(':') else {
            continue;
        };
        let cols: Vec<u64> = rest
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if cols.len() < 16 {
            continue;
        }
        for (total, v) in totals.iter_mut().zip(cols) {
            *total += v;
        }
        interfaces += 1;
    }
    if interfaces == 0 {
        return Err(CollectError::Parse(
            "в /proc/net/dev нет интерфейсов".to_string(),
        ));
    }

    // rx: bytes packets errs drop ...; tx starts at column 8.
    Ok(NetworkFragment {
        bytes_recv: totals[0],
        packets_recv: totals[1],
        errors_in: totals[2],
        drops_in: totals[3],
        bytes_sent: totals[8],
        packets_sent: totals[9],
        errors_out: totals[10],
        drops_out: totals[11],
        sent: format_bytes(totals[8]),
        recv: format_bytes(totals[0]),
        rates: None,
    })
}

pub struct ConnectionsCollector {
    root: PathBuf,
}

impl ConnectionsCollector {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl Collector for ConnectionsCollector {
    fn name(&self) -> &'static str {
        super::CONNECTIONS
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        let root = self.root.clone();
        Box::pin(async move {
            blocking(move || {
                let tables = [("tcp", true), ("tcp6", true), ("udp", false), ("udp6", false)]
                    .into_iter()
                    .map(|(file, is_tcp)| {
                        (file, is_tcp, fs::read_to_string(root.join("net").join(file)))
                    })
                    .collect();
                count_connections(tables).map(Fragment::Connections)
            })
            .await
            .into()
        })
    }
}

type SocketTable = (&'static str, bool, io::Result<String>);

fn count_connections(tables: Vec<SocketTable>) -> Result<ConnectionsFragment, CollectError> {
    let mut counts = ConnectionsFragment::default();
    let mut read_any = false;
    for (file, is_tcp, content) in tables {
        match content {
            Ok(text) => {
                read_any = true;
                count_socket_table(&text, is_tcp, &mut counts);
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!(table = file, "нет доступа к таблице сокетов");
                return Ok(ConnectionsFragment {
                    access_denied: true,
                    ..ConnectionsFragment::default()
                });
            }
            // IPv6 tables disappear when the stack is disabled.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(CollectError::Io(err)),
        }
    }
    if !read_any {
        return Err(CollectError::Unsupported);
    }
    Ok(counts)
}

fn count_socket_table(text: &str, is_tcp: bool, counts: &mut ConnectionsFragment) {
    for line in text.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        // col 3 = state (hex)
        if parts.len() < 4 {
            continue;
        }
        counts.total += 1;
        if !is_tcp {
            continue;
        }
        match u8::from_str_radix(parts[3], 16).unwrap_or(0) {
            0x01 => counts.established += 1,
            0x06 => counts.time_wait += 1,
            0x0A => counts.listen += 1,
            _ => {}
        }
    }
}

fn read_proc(path: &Path) -> Result<String, CollectError> {
    fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => CollectError::Unsupported,
        io::ErrorKind::PermissionDenied => {
            CollectError::PermissionDenied(path.display().to_string())
        }
        _ => CollectError::Io(err),
    })
}
