use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceCategory {
    Web,
    Ssh,
    Ftp,
    Rdp,
    Dns,
    Smtp,
    Pop3,
    Imap,
    Db,
    FileSharing,
    Vpn,
    Misc,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Web => "web",
            ServiceCategory::Ssh => "ssh",
            ServiceCategory::Ftp => "ftp",
            ServiceCategory::Rdp => "rdp",
            ServiceCategory::Dns => "dns",
            ServiceCategory::Smtp => "smtp",
            ServiceCategory::Pop3 => "pop3",
            ServiceCategory::Imap => "imap",
            ServiceCategory::Db => "db",
            ServiceCategory::FileSharing => "file-sharing",
            ServiceCategory::Vpn => "vpn",
            ServiceCategory::Misc => "misc",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open port seen on one host in one scan document.
///
/// `hostnames` and `os_guess` are the values of the host entry in the
/// document that produced the observation, not the merged host record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortObservation {
    pub port: u16,
    pub address: String,
    pub hostnames: Vec<String>,
    pub os_guess: String,
    pub protocol: String,
    pub service: String,
    pub category: ServiceCategory,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub script_id: Option<String>,
    #[serde(default)]
    pub script_output: Option<String>,
    pub risk: RiskLevel,
    #[serde(default)]
    pub vulnerability_ids: Vec<String>,
    pub source: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    pub address: String,
    pub hostnames: BTreeSet<String>,
    pub os_guess: String,
    pub ports: Vec<PortObservation>,
    pub source: String,
    pub scanned_at: String,
}

impl HostRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hostnames: BTreeSet::new(),
            os_guess: "unknown".to_string(),
            ports: Vec::new(),
            source: String::new(),
            scanned_at: String::new(),
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }
}
