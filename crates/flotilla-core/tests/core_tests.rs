//! Tests for flotilla-core: data model serde, protocol, errors, config.

use chrono::Utc;
use flotilla_core::*;

// ===========================================================================
// Agent + status
// ===========================================================================

#[test]
fn agent_serde_roundtrip() {
    let mut agent = Agent::new("team-opusred001", "OpusRed", "OpusRed");
    agent.status = AgentStatus::Working;
    agent.pid = Some(4242);
    agent.pane = Some("%12".to_string());
    agent.current_task = Some("audit auth module".to_string());

    let json = serde_json::to_string(&agent).unwrap();
    let back: Agent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, "team-opusred001");
    assert_eq!(back.status, AgentStatus::Working);
    assert_eq!(back.pid, Some(4242));
    assert_eq!(back.pane.as_deref(), Some("%12"));
}

#[test]
fn agent_status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&AgentStatus::Disconnected).unwrap(),
        r#""disconnected""#
    );
    assert_eq!(format!("{}", AgentStatus::Stopping), "stopping");
}

// ===========================================================================
// Stop approval
// ===========================================================================

#[test]
fn stop_approval_starts_unreviewed() {
    let req = StopApprovalRequest::new("team-sntgreen001", StopReason::TaskComplete);
    assert!(!req.reviewed);
    assert!(!req.approved);
    assert!(req.response.is_none());
}

#[test]
fn stop_reason_wire_names() {
    assert_eq!(
        serde_json::to_string(&StopReason::NeedsInput).unwrap(),
        r#""needs_input""#
    );
    assert_eq!(
        serde_json::to_string(&StopReason::TaskComplete).unwrap(),
        r#""task_complete""#
    );
}

// ===========================================================================
// Report model
// ===========================================================================

#[test]
fn report_json_roundtrip_preserves_buckets() {
    let report = Report {
        agent_id: "recon-1".into(),
        environment: "proj-api".into(),
        mission: "security sweep".into(),
        timestamp: Utc::now(),
        findings: FindingBuckets {
            critical: vec![Finding {
                id: "f-1".into(),
                kind: "security".into(),
                description: "SQL injection in login".into(),
                location: Some("src/auth.rs:42".into()),
                recommendation: Some("parameterize queries".into()),
            }],
            ..Default::default()
        },
        summary: ReportSummary {
            total_findings: 1,
            files_scanned: 120,
            notes: None,
        },
        recommendations: Recommendations {
            immediate: vec!["fix the injection".into()],
            ..Default::default()
        },
    };

    let json = serde_json::to_string(&report).unwrap();
    let back: Report = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
    assert_eq!(back.findings.total(), 1);
}

#[test]
fn report_missing_buckets_deserialize_empty() {
    let json = r#"{
        "agent_id": "r", "environment": "e", "mission": "m",
        "timestamp": "2026-01-01T00:00:00Z",
        "findings": { "high": [] },
        "summary": {},
        "recommendations": {}
    }"#;
    let report: Report = serde_json::from_str(json).unwrap();
    assert!(report.findings.critical.is_empty());
    assert!(report.findings.low.is_empty());
    assert!(report.recommendations.immediate.is_empty());
}

// ===========================================================================
// Protocol
// ===========================================================================

#[test]
fn rpc_request_parses_with_params() {
    let req: RpcRequest = serde_json::from_str(
        r#"{ "id": "req-1", "method": "report_status", "params": { "status": "working" } }"#,
    )
    .unwrap();
    assert_eq!(req.id, "req-1");
    assert_eq!(req.params["status"], "working");
}

#[test]
fn event_message_roundtrip() {
    let evt = EventMessage::shutdown_request("task reassigned");
    let json = serde_json::to_string(&evt).unwrap();
    let back: EventMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back.event, "shutdown_request");
    assert_eq!(back.data["reason"], "task reassigned");
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn client_error_classification() {
    assert!(Error::not_found("agent x").is_client_error());
    assert!(Error::conflict("already reviewed").is_client_error());
    assert!(Error::invalid_input("bad body").is_client_error());
    assert!(!Error::spawn_failed("tmux exited").is_client_error());
    assert!(!Error::Transient("disk".into()).is_client_error());
}

#[test]
fn error_display_messages() {
    assert_eq!(
        format!("{}", Error::PaneUnavailable("%3".into())),
        "pane unavailable: %3"
    );
    assert_eq!(
        format!("{}", Error::CrashLoop("captain".into())),
        "crash loop: captain"
    );
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn builtin_roster_has_all_recommendation_targets() {
    let reg = ConfigRegistry::builtin();
    for name in ["SNTGreen", "SNTRed", "SNTPurple", "OpusGreen", "OpusRed"] {
        assert!(reg.get(name).is_some(), "missing {name}");
    }
}

#[test]
fn command_template_mentions_transport_config() {
    let reg = ConfigRegistry::builtin();
    assert!(reg.get("SNTGreen").unwrap().command.contains("{config}"));
}
