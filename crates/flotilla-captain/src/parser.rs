//! Recon report parser.
//!
//! Reports arrive as YAML or JSON. Payloads that look like JSON are tried as
//! JSON first with a YAML fallback, and vice versa. Missing sections are
//! validation errors; missing finding IDs are synthesized from a monotonic
//! timestamp; severity buckets always come back as lists.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use flotilla_core::{
    Error, Finding, FindingBuckets, Recommendations, Report, ReportSummary, Result,
};
use serde::Deserialize;

const FALLBACK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static SYNTH_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default, Deserialize)]
struct RawFinding {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBuckets {
    #[serde(default)]
    critical: Vec<RawFinding>,
    #[serde(default)]
    high: Vec<RawFinding>,
    #[serde(default)]
    medium: Vec<RawFinding>,
    #[serde(default)]
    low: Vec<RawFinding>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReport {
    #[serde(default, alias = "agent-id")]
    agent_id: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    mission: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    findings: Option<RawBuckets>,
    #[serde(default)]
    summary: Option<ReportSummary>,
    #[serde(default)]
    recommendations: Option<Recommendations>,
}

/// Parse a report from either encoding into the canonical model.
pub fn parse_report(input: &str) -> Result<Report> {
    let looks_like_json = input.trim_start().starts_with(['{', '[']);
    let raw: RawReport = if looks_like_json {
        match serde_json::from_str(input) {
            Ok(r) => r,
            Err(json_err) => serde_yaml::from_str(input).map_err(|yaml_err| {
                Error::invalid_input(format!(
                    "report parse failed as json ({json_err}) and yaml ({yaml_err})"
                ))
            })?,
        }
    } else {
        match serde_yaml::from_str(input) {
            Ok(r) => r,
            Err(yaml_err) => serde_json::from_str(input).map_err(|json_err| {
                Error::invalid_input(format!(
                    "report parse failed as yaml ({yaml_err}) and json ({json_err})"
                ))
            })?,
        }
    };
    canonicalize(raw)
}

/// Parse a report already decoded as a JSON value (the tool-call path).
pub fn parse_report_value(value: &serde_json::Value) -> Result<Report> {
    let raw: RawReport = serde_json::from_value(value.clone())
        .map_err(|e| Error::invalid_input(format!("report parse failed: {e}")))?;
    canonicalize(raw)
}

fn canonicalize(raw: RawReport) -> Result<Report> {
    let agent_id = require(raw.agent_id, "agent-id")?;
    let environment = require(raw.environment, "environment")?;
    let mission = require(raw.mission, "mission")?;
    let findings = raw
        .findings
        .ok_or_else(|| Error::invalid_input("missing section: findings"))?;
    let summary = raw
        .summary
        .ok_or_else(|| Error::invalid_input("missing section: summary"))?;
    let recommendations = raw
        .recommendations
        .ok_or_else(|| Error::invalid_input("missing section: recommendations"))?;

    let timestamp = parse_timestamp(raw.timestamp.as_deref());

    Ok(Report {
        agent_id,
        environment,
        mission,
        timestamp,
        findings: FindingBuckets {
            critical: findings.critical.into_iter().map(finalize_finding).collect(),
            high: findings.high.into_iter().map(finalize_finding).collect(),
            medium: findings.medium.into_iter().map(finalize_finding).collect(),
            low: findings.low.into_iter().map(finalize_finding).collect(),
        },
        summary,
        recommendations,
    })
}

fn require(value: Option<String>, section: &str) -> Result<String> {
    value
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::invalid_input(format!("missing section: {section}")))
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, FALLBACK_TIMESTAMP_FORMAT) {
        return naive.and_utc();
    }
    Utc::now()
}

fn finalize_finding(raw: RawFinding) -> Finding {
    Finding {
        id: raw.id.filter(|s| !s.is_empty()).unwrap_or_else(synthesize_id),
        kind: raw.kind.unwrap_or_else(|| "general".to_string()),
        description: raw.description.unwrap_or_default(),
        location: raw.location,
        recommendation: raw.recommendation,
    }
}

/// IDs for findings that arrived without one. Monotonic within the process
/// even when two findings land on the same nanosecond.
fn synthesize_id() -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros());
    let seq = SYNTH_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("finding-{nanos}-{seq}")
}
