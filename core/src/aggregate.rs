use crate::classify::classify;
use crate::model::{HostRecord, PortObservation, RiskLevel};
use crate::parser::{HostEntry, ParsedDocument, RawPort};
use crate::risk::{assess_risk, extract_vulnerability_ids};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How multiple `<script>` results on one port are folded into a single
/// observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPolicy {
    /// Keep only the last script, matching the historical report layout.
    #[default]
    LastOnly,
    /// Join all script ids with `,` and all outputs with a blank line.
    All,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregate {
    /// In order of first appearance across documents.
    pub hosts: Vec<HostRecord>,
    /// Sorted by port, then address.
    pub observations: Vec<PortObservation>,
}

#[derive(Debug, Default)]
pub struct Aggregator {
    policy: ScriptPolicy,
    hosts: Vec<HostRecord>,
    index: HashMap<String, usize>,
    observations: Vec<PortObservation>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ScriptPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Folds one document into the running state. Scalar host fields are
    /// overwritten by the latest document; hostnames are unioned and ports
    /// appended.
    pub fn ingest(&mut self, document: &ParsedDocument) {
        for host in &document.hosts {
            if host.ports.is_empty() {
                continue;
            }

            let slot = match self.index.get(&host.address) {
                Some(slot) => *slot,
                None => {
                    self.hosts.push(HostRecord::new(host.address.clone()));
                    self.index
                        .insert(host.address.clone(), self.hosts.len() - 1);
                    self.hosts.len() - 1
                }
            };

            let record = &mut self.hosts[slot];
            record.hostnames.extend(host.hostnames.iter().cloned());
            record.os_guess = host.os_guess.clone();
            record.source = document.name.clone();
            record.scanned_at = document.scanned_at.clone();

            for port in &host.ports {
                let observation = observe(host, port, &document.name, self.policy);
                record.ports.push(observation.clone());
                self.observations.push(observation);
            }
        }
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn finish(self) -> Aggregate {
        let mut observations = self.observations;
        observations.sort_by(|a, b| {
            a.port
                .cmp(&b.port)
                .then_with(|| a.address.cmp(&b.address))
        });

        Aggregate {
            hosts: self.hosts,
            observations,
        }
    }
}

pub fn aggregate(documents: &[ParsedDocument], policy: ScriptPolicy) -> Aggregate {
    let mut aggregator = Aggregator::with_policy(policy);
    for document in documents {
        aggregator.ingest(document);
    }
    aggregator.finish()
}

/// Builds a fully classified observation for one open port.
pub fn observe(
    host: &HostEntry,
    port: &RawPort,
    source: &str,
    policy: ScriptPolicy,
) -> PortObservation {
    let (script_id, script_output) = match policy {
        ScriptPolicy::LastOnly => port
            .last_script()
            .map(|script| (script.id.clone(), script.output.clone()))
            .unzip(),
        ScriptPolicy::All if port.scripts.is_empty() => (None, None),
        ScriptPolicy::All => {
            let ids: Vec<&str> = port.scripts.iter().map(|s| s.id.as_str()).collect();
            let outputs: Vec<&str> = port.scripts.iter().map(|s| s.output.as_str()).collect();
            (Some(ids.join(",")), Some(outputs.join("\n\n")))
        }
    };

    let (risk, vulnerability_ids) = match &script_output {
        Some(output) => (assess_risk(output), extract_vulnerability_ids(output)),
        None => (RiskLevel::Low, Vec::new()),
    };

    PortObservation {
        port: port.port,
        address: host.address.clone(),
        hostnames: host.hostnames.clone(),
        os_guess: host.os_guess.clone(),
        protocol: port.protocol.clone(),
        service: port.service.clone(),
        category: classify(port.port, &port.service),
        product: port.product.clone(),
        fingerprint: port.fingerprint.clone(),
        script_id,
        script_output,
        risk,
        vulnerability_ids,
        source: source.to_string(),
        notes: String::new(),
    }
}
