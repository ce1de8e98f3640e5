use super::{escape_html, CollectError, Collector, CollectorResult};
use crate::probe::{ProbeError, ProbeRunner};
use crate::snapshot::{Fragment, VpnFragment, VpnPeer};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX_CHARS: usize = 16;

pub struct VpnCollector {
    probe: Arc<dyn ProbeRunner>,
    interface: String,
    service: String,
}

impl VpnCollector {
    pub fn new(probe: Arc<dyn ProbeRunner>, interface: String, service: String) -> Self {
        Self {
            probe,
            interface,
            service,
        }
    }

    async fn status(&self) -> Result<VpnFragment, CollectError> {
        let mut status = VpnFragment {
            interface: escape_html(&self.interface),
            ..VpnFragment::default()
        };

        match self.probe.run("which", &["wg"]).await {
            Ok(_) => status.installed = true,
            Err(err @ ProbeError::TimedOut { .. }) => return Err(err.into()),
            Err(err) => {
                debug!(error = %err, "wg не найден");
                return Ok(status);
            }
        }

        let active = match self
            .probe
            .run("systemctl", &["is-active", self.service.as_str()])
            .await
        {
            Ok(out) => out.stdout.trim() == "active",
            Err(ProbeError::NonZeroExit { .. }) => false,
            Err(err) => return Err(err.into()),
        };
        if !active {
            return Ok(status);
        }
        status.running = true;

        match self
            .probe
            .run("wg", &["show", self.interface.as_str()])
            .await
        {
            Ok(out) => status.peers = parse_peers(&out.stdout),
            // Interface not up yet or not enough privilege: running, no peers.
            Err(err @ ProbeError::NonZeroExit { .. }) => {
                debug!(error = %err, "wg show");
            }
            Err(err) => return Err(err.into()),
        }
        status.peer_count = status.peers.len();
        Ok(status)
    }
}

impl Collector for VpnCollector {
    fn name(&self) -> &'static str {
        super::VPN
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        Box::pin(async move { self.status().await.map(Fragment::Vpn).into() })
    }
}

#[derive(Debug, Default)]
enum ParserState {
    #[default]
    NoPeer,
    InPeer(VpnPeer),
}

#[derive(Debug, Default)]
struct PeerBlockParser {
    state: ParserState,
    peers: Vec<VpnPeer>,
}

impl PeerBlockParser {
    fn feed(&mut self, line: &str) {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            return;
        };
        let value = value.trim();

        if key == "peer" {
            self.flush();
            self.state = ParserState::InPeer(VpnPeer {
                public_key_prefix: key_prefix(value),
                ..VpnPeer::default()
            });
            return;
        }

        let ParserState::InPeer(peer) = &mut self.state else {
            return;
        };
        match key {
            "endpoint" => peer.endpoint_masked = mask_endpoint(value),
            "latest handshake" => peer.last_handshake = Some(escape_html(value)),
            "transfer" => peer.transfer_stats = Some(escape_html(value)),
            _ => {}
        }
    }

    fn flush(&mut self) {
        if let ParserState::InPeer(peer) = std::mem::take(&mut self.state) {
            self.peers.push(peer);
        }
    }

    fn finish(mut self) -> Vec<VpnPeer> {
        self.flush();
        self.peers
    }
}

fn parse_peers(output: &str) -> Vec<VpnPeer> {
    let mut parser = PeerBlockParser::default();
    for line in output.lines() {
        parser.feed(line);
    }
    parser.finish()
}

fn key_prefix(key: &str) -> String {
    let prefix: String = key.chars().take(KEY_PREFIX_CHARS).collect();
    format!("{}...", escape_html(&prefix))
}

fn mask_endpoint(endpoint: &str) -> Option<String> {
    let segments: Vec<&str> = endpoint.split('.').collect();
    if segments.len() < 4 {
        return None;
    }
    let last = segments.last()?;
    Some(format!(
        "{}{}",
        "xxx.".repeat(segments.len() - 1),
        escape_html(last)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{Scripted, ScriptedProbe};

    const WG_SHOW: &str = "\
interface: wg0
  public key: SERVERKEYxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx=
  private key: (hidden)
  listening port: 51820

peer: AbCdEfGhIjKlMnOpQrStUvWxYz0123456789abcdefg=
  endpoint: 203.0.113.45:51820
  allowed ips: 10.0.0.2/32
  latest handshake: 1 minute, 2 seconds ago
  transfer: 1.21 MiB received, 3.40 MiB sent

peer: ZyXwVuTsRqPoNmLkJiHgFeDcBa9876543210zyxwvut=
  allowed ips: 10.0.0.3/32
";

    fn collector(probe: ScriptedProbe) -> VpnCollector {
        VpnCollector::new(Arc::new(probe), "wg0".to_string(), "wg-quick@wg0".to_string())
    }

    #[test]
    fn parser_flushes_on_new_peer_and_at_end() {
        let peers = parse_peers(WG_SHOW);
        assert_eq!(peers.len(), 2);

        assert_eq!(peers[0].public_key_prefix, "AbCdEfGhIjKlMnOp...");
        assert_eq!(peers[0].endpoint_masked.as_deref(), Some("xxx.xxx.xxx.45:51820"));
        assert_eq!(
            peers[0].last_handshake.as_deref(),
            Some("1 minute, 2 seconds ago")
        );
        assert_eq!(
            peers[0].transfer_stats.as_deref(),
            Some("1.21 MiB received, 3.40 MiB sent")
        );

        assert_eq!(peers[1].public_key_prefix, "ZyXwVuTsRqPoNmLk...");
        assert_eq!(peers[1].endpoint_masked, None);
        assert_eq!(peers[1].last_handshake, None);
    }

    #[test]
    fn interface_fields_before_first_peer_are_ignored() {
        let mut parser = PeerBlockParser::default();
        parser.feed("interface: wg0");
        parser.feed("  endpoint: 198.51.100.7:1");
        assert!(matches!(parser.state, ParserState::NoPeer));
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn endpoint_masking_keeps_only_last_segment() {
        assert_eq!(mask_endpoint("10.1.2.3:51820").as_deref(), Some("xxx.xxx.xxx.3:51820"));
        assert_eq!(mask_endpoint("[2001:db8::1]:51820"), None);
        assert_eq!(mask_endpoint("host.example:1"), None);
        assert_eq!(
            mask_endpoint("1.2.3.4.<b>").as_deref(),
            Some("xxx.xxx.xxx.xxx.&lt;b&gt;")
        );
    }

    #[test]
    fn key_prefix_never_exposes_full_key() {
        let key = "AbCdEfGhIjKlMnOpQrStUvWxYz0123456789abcdefg=";
        let prefix = key_prefix(key);
        assert!(!prefix.contains(key));
        assert_eq!(prefix.len(), KEY_PREFIX_CHARS + 3);
    }

    #[tokio::test]
    async fn missing_tool_short_circuits() {
        let probe = ScriptedProbe::new().on("which wg", Scripted::Exit(1, ""));
        let CollectorResult::Ok(Fragment::Vpn(vpn)) = collector(probe).collect().await else {
            panic!("vpn fragment expected");
        };
        assert!(!vpn.installed);
        assert!(!vpn.running);
        assert!(vpn.peers.is_empty());
    }

    #[tokio::test]
    async fn stopped_service_skips_peer_query() {
        let probe = Arc::new(
            ScriptedProbe::new()
                .on("which wg", Scripted::Ok("/usr/bin/wg\n"))
                .on("systemctl is-active wg-quick@wg0", Scripted::Exit(3, "inactive\n")),
        );
        let vpn = VpnCollector::new(probe.clone(), "wg0".to_string(), "wg-quick@wg0".to_string());
        let CollectorResult::Ok(Fragment::Vpn(status)) = vpn.collect().await else {
            panic!("vpn fragment expected");
        };
        assert!(status.installed);
        assert!(!status.running);
        assert!(!probe.calls().iter().any(|c| c.starts_with("wg show")));
    }

    #[tokio::test]
    async fn running_tunnel_reports_peers() {
        let probe = ScriptedProbe::new()
            .on("which wg", Scripted::Ok("/usr/bin/wg\n"))
            .on("systemctl is-active wg-quick@wg0", Scripted::Ok("active\n"))
            .on("wg show wg0", Scripted::Ok(WG_SHOW));
        let CollectorResult::Ok(Fragment::Vpn(vpn)) = collector(probe).collect().await else {
            panic!("vpn fragment expected");
        };
        assert!(vpn.installed && vpn.running);
        assert_eq!(vpn.peer_count, 2);
        assert_eq!(vpn.interface, "wg0");
    }

    #[tokio::test]
    async fn hung_peer_query_times_out() {
        let probe = ScriptedProbe::new()
            .on("which wg", Scripted::Ok("/usr/bin/wg\n"))
            .on("systemctl is-active wg-quick@wg0", Scripted::Ok("active\n"))
            .on("wg show wg0", Scripted::Timeout);
        assert!(matches!(
            collector(probe).collect().await,
            CollectorResult::TimedOut
        ));
    }
}
