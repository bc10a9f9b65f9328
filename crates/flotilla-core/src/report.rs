//! Canonical recon report model.
//!
//! Reports arrive from recon agents in YAML or JSON; the captain crate
//! normalizes both encodings into these structs. Severity buckets are always
//! present (possibly empty) so downstream code never branches on absence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// A single observation from a recon run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Findings grouped by severity. Buckets default to empty, never absent.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FindingBuckets {
    #[serde(default)]
    pub critical: Vec<Finding>,
    #[serde(default)]
    pub high: Vec<Finding>,
    #[serde(default)]
    pub medium: Vec<Finding>,
    #[serde(default)]
    pub low: Vec<Finding>,
}

impl FindingBuckets {
    pub fn bucket(&self, severity: Severity) -> &[Finding] {
        match severity {
            Severity::Critical => &self.critical,
            Severity::High => &self.high,
            Severity::Medium => &self.medium,
            Severity::Low => &self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical.len() + self.high.len() + self.medium.len() + self.low.len()
    }

    /// All findings across severities, critical first.
    pub fn iter_all(&self) -> impl Iterator<Item = (Severity, &Finding)> {
        Severity::ALL
            .into_iter()
            .flat_map(move |s| self.bucket(s).iter().map(move |f| (s, f)))
    }

    /// Findings whose `type` tag equals `kind` (case-insensitive), any severity.
    pub fn count_of_kind(&self, kind: &str) -> usize {
        self.iter_all()
            .filter(|(_, f)| f.kind.eq_ignore_ascii_case(kind))
            .count()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportSummary {
    #[serde(default)]
    pub total_findings: usize,
    #[serde(default)]
    pub files_scanned: usize,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Recommendation buckets by time horizon.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Recommendations {
    #[serde(default)]
    pub immediate: Vec<String>,
    #[serde(default)]
    pub short_term: Vec<String>,
    #[serde(default)]
    pub long_term: Vec<String>,
}

impl Recommendations {
    pub fn total(&self) -> usize {
        self.immediate.len() + self.short_term.len() + self.long_term.len()
    }
}

/// The canonical recon report consumed by the decision engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub agent_id: String,
    pub environment: String,
    pub mission: String,
    pub timestamp: DateTime<Utc>,
    pub findings: FindingBuckets,
    pub summary: ReportSummary,
    pub recommendations: Recommendations,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: &str) -> Finding {
        Finding {
            id: "f1".into(),
            kind: kind.into(),
            description: "d".into(),
            location: None,
            recommendation: None,
        }
    }

    #[test]
    fn buckets_total_and_iteration_order() {
        let buckets = FindingBuckets {
            critical: vec![finding("security")],
            high: vec![finding("code_quality"), finding("security")],
            medium: vec![],
            low: vec![finding("style")],
        };
        assert_eq!(buckets.total(), 4);
        let severities: Vec<Severity> = buckets.iter_all().map(|(s, _)| s).collect();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::High, Severity::High, Severity::Low]
        );
    }

    #[test]
    fn count_of_kind_is_case_insensitive() {
        let buckets = FindingBuckets {
            critical: vec![finding("Security")],
            high: vec![finding("security")],
            ..Default::default()
        };
        assert_eq!(buckets.count_of_kind("SECURITY"), 2);
        assert_eq!(buckets.count_of_kind("architecture"), 0);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), r#""critical""#);
        assert_eq!(format!("{}", Severity::High), "high");
    }
}
