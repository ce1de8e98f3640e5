use super::{escape_html, CollectError, Collector, CollectorResult};
use crate::probe::ProbeRunner;
use crate::snapshot::{Fragment, LoginRecord};
use futures_util::future::BoxFuture;
use std::sync::Arc;

const MAX_LOGINS: usize = 5;

pub struct LoginCollector {
    probe: Arc<dyn ProbeRunner>,
}

impl LoginCollector {
    pub fn new(probe: Arc<dyn ProbeRunner>) -> Self {
        Self { probe }
    }
}

impl Collector for LoginCollector {
    fn name(&self) -> &'static str {
        super::LOGINS
    }

    fn collect(&self) -> BoxFuture<'_, CollectorResult> {
        Box::pin(async move {
            self.probe
                .run("last", &["-n", "10", "-w"])
                .await
                .map(|out| Fragment::Logins(parse_last(&out.stdout)))
                .map_err(CollectError::from)
                .into()
        })
    }
}

fn parse_last(output: &str) -> Vec<LoginRecord> {
    output
        .lines()
        .filter(|line| {
            !line.trim().is_empty() && !line.starts_with("wtmp") && !line.starts_with("reboot")
        })
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 4 {
                return None;
            }
            let date = if tokens.len() >= 7 {
                tokens[3..7].join(" ")
            } else {
                "Unknown".to_string()
            };
            Some(LoginRecord {
                user: escape_html(tokens[0]),
                terminal: escape_html(tokens[1]),
                date: escape_html(&date),
            })
        })
        .take(MAX_LOGINS)
        .collect()
}
