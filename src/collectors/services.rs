use super::{escape_html, CollectError, Collector, CollectorResult};
use crate::probe::{ProbeError, ProbeOutput, ProbeRunner};
use crate::snapshot::{FirewallFragment, Fragment, ServiceState};
use futures_util::future::{join_all, BoxFuture};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub struct ServiceCollector {
    probe: Arc<dyn ProbeRunner>,
    services: Vec<String>,
}

impl ServiceCollector {
    pub fn new(probe: Arc<dyn ProbeRunner>, services: Vec<String>) -> Self {
        Self { probe, services }
    }
}

impl Collector for ServiceCollector {
    fn name(&self) -> &'static str {
        super::SERVICES
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        Box::pin(async move {
            let queries = self.services.iter().map(|name| async move {
                let result = self.probe.run("systemctl", &["is-active", name.as_str()]).await;
                if let Err(err) = &result {
                    debug!(service = %name, error = %err, "systemctl is-active");
                }
                (name.clone(), service_state(&result))
            });
            let states: BTreeMap<String, ServiceState> =
                join_all(queries).await.into_iter().collect();
            CollectorResult::Ok(Fragment::Services(states))
        })
    }
}

// `systemctl is-active` exits non-zero for anything but `active`.
fn service_state(result: &Result<ProbeOutput, ProbeError>) -> ServiceState {
    let stdout = match result {
        Ok(out) => out.stdout.as_str(),
        Err(err) => err.stdout().unwrap_or_default(),
    };
    match stdout.trim() {
        "active" => ServiceState::Active,
        "inactive" | "failed" => ServiceState::Inactive,
        _ => ServiceState::Unknown,
    }
}

pub struct FirewallCollector {
    probe: Arc<dyn ProbeRunner>,
    service: String,
}

impl FirewallCollector {
    pub fn new(probe: Arc<dyn ProbeRunner>, service: String) -> Self {
        Self { probe, service }
    }

    async fn firewall(&self) -> Result<FirewallFragment, CollectError> {
        match self
            .probe
            .run("systemctl", &["is-active", self.service.as_str()])
            .await
        {
            Ok(out) if out.stdout.trim() == "active" => {}
            Ok(_) | Err(ProbeError::NonZeroExit { .. }) => {
                return Ok(FirewallFragment::default());
            }
            Err(err) => return Err(err.into()),
        }

        let open_ports = match self.probe.run("firewall-cmd", &["--list-ports"]).await {
            Ok(out) => parse_ports(&out.stdout),
            Err(err @ ProbeError::TimedOut { .. }) => return Err(err.into()),
            Err(err) => {
                debug!(error = %err, "firewall-cmd --list-ports");
                Vec::new()
            }
        };
        Ok(FirewallFragment {
            active: true,
            open_ports,
        })
    }
}

impl Collector for FirewallCollector {
    fn name(&self) -> &'static str {
        super::FIREWALL
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        Box::pin(async move { self.firewall().await.map(Fragment::Firewall).into() })
    }
}

fn parse_ports(stdout: &str) -> Vec<String> {
    stdout.split_whitespace().map(escape_html).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{Scripted, ScriptedProbe};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn each_service_is_queried_independently() {
        let probe = ScriptedProbe::new()
            .on("systemctl is-active sshd", Scripted::Ok("active\n"))
            .on("systemctl is-active firewalld", Scripted::Exit(3, "inactive\n"))
            .on("systemctl is-active wg-quick@wg0", Scripted::Timeout);
        let collector = ServiceCollector::new(
            Arc::new(probe),
            names(&["sshd", "firewalld", "wg-quick@wg0", "nginx"]),
        );

        let CollectorResult::Ok(Fragment::Services(states)) = collector.collect().await else {
            panic!("services fragment expected");
        };
        assert_eq!(states["sshd"], ServiceState::Active);
        assert_eq!(states["firewalld"], ServiceState::Inactive);
        assert_eq!(states["wg-quick@wg0"], ServiceState::Unknown);
        assert_eq!(states["nginx"], ServiceState::Unknown);
    }

    #[test]
    fn failed_unit_counts_as_inactive() {
        let result = Err(ProbeError::NonZeroExit {
            program: "systemctl".to_string(),
            code: Some(3),
            stdout: "failed\n".to_string(),
        });
        assert_eq!(service_state(&result), ServiceState::Inactive);
    }

    #[tokio::test]
    async fn active_firewall_lists_ports() {
        let probe = ScriptedProbe::new()
            .on("systemctl is-active firewalld", Scripted::Ok("active\n"))
            .on("firewall-cmd --list-ports", Scripted::Ok("22/tcp 51820/udp <x>\n"));
        let collector = FirewallCollector::new(Arc::new(probe), "firewalld".to_string());

        let CollectorResult::Ok(Fragment::Firewall(fw)) = collector.collect().await else {
            panic!("firewall fragment expected");
        };
        assert!(fw.active);
        assert_eq!(fw.open_ports, vec!["22/tcp", "51820/udp", "&lt;x&gt;"]);
    }

    #[tokio::test]
    async fn failed_port_query_keeps_active_state() {
        let probe = ScriptedProbe::new()
            .on("systemctl is-active firewalld", Scripted::Ok("active\n"))
            .on("firewall-cmd --list-ports", Scripted::Exit(11, ""));
        let collector = FirewallCollector::new(Arc::new(probe), "firewalld".to_string());

        let CollectorResult::Ok(Fragment::Firewall(fw)) = collector.collect().await else {
            panic!("firewall fragment expected");
        };
        assert!(fw.active);
        assert!(fw.open_ports.is_empty());
    }

    #[tokio::test]
    async fn missing_firewall_cmd_keeps_active_state() {
        let probe = ScriptedProbe::new()
            .on("systemctl is-active firewalld", Scripted::Ok("active\n"));
        let collector = FirewallCollector::new(Arc::new(probe), "firewalld".to_string());

        let CollectorResult::Ok(Fragment::Firewall(fw)) = collector.collect().await else {
            panic!("firewall fragment expected");
        };
        assert_eq!(
            fw,
            FirewallFragment {
                active: true,
                open_ports: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn hung_port_query_times_out() {
        let probe = ScriptedProbe::new()
            .on("systemctl is-active firewalld", Scripted::Ok("active\n"))
            .on("firewall-cmd --list-ports", Scripted::Timeout);
        let collector = FirewallCollector::new(Arc::new(probe), "firewalld".to_string());
        assert!(matches!(collector.collect().await, CollectorResult::TimedOut));
    }

    #[tokio::test]
    async fn inactive_firewall_skips_port_query() {
        let probe = Arc::new(
            ScriptedProbe::new()
                .on("systemctl is-active firewalld", Scripted::Exit(3, "inactive\n")),
        );
        let collector = FirewallCollector::new(probe.clone(), "firewalld".to_string());

        let CollectorResult::Ok(Fragment::Firewall(fw)) = collector.collect().await else {
            panic!("firewall fragment expected");
        };
        assert_eq!(fw, FirewallFragment::default());
        assert_eq!(probe.calls(), vec!["systemctl is-active firewalld"]);
    }

    #[tokio::test]
    async fn missing_systemctl_fails_collector() {
        let collector =
            FirewallCollector::new(Arc::new(ScriptedProbe::new()), "firewalld".to_string());
        assert!(matches!(
            collector.collect().await,
            CollectorResult::Failed(_)
        ));
    }
}
