use crate::model::RiskLevel;
use regex::Regex;
use std::sync::OnceLock;

const HIGH_MARKERS: &[&str] = &["vulnerable", "cve-"];
const MEDIUM_MARKERS: &[&str] = &["weak", "outdated"];

static CVE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn cve_pattern() -> &'static Regex {
    CVE_PATTERN.get_or_init(|| {
        Regex::new(r"CVE-\d{4}-\d{4,7}").expect("CVE pattern is a valid regex")
    })
}

/// Coarse severity of a probe script's output. Only the first matching
/// tier applies.
pub fn assess_risk(output: &str) -> RiskLevel {
    let lowered = output.to_lowercase();
    if HIGH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        RiskLevel::High
    } else if MEDIUM_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// All `CVE-YYYY-NNNN[NNN]` identifiers in order of appearance, duplicates
/// included. Matching is case-sensitive on the `CVE-` prefix.
pub fn extract_vulnerability_ids(output: &str) -> Vec<String> {
    cve_pattern()
        .find_iter(output)
        .map(|found| found.as_str().to_string())
        .collect()
}
