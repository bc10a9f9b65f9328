//! Decision engine — canonical report in, action plan out.
//!
//! Pure with respect to the report: fixed inputs produce the same plan
//! modulo the plan id and timestamp.

use chrono::Utc;
use flotilla_core::{
    ActionHorizon, ActionPlan, AgentRecommendation, OperationalMode, PlanPriority, PlannedAction,
    Report, Severity,
};

const SECURITY_KEYWORDS: &[&str] = &["security", "vulnerability", "injection", "xss"];
const ARCHITECTURE_KEYWORDS: &[&str] = &["architecture", "design", "refactor"];

/// Escalation triggers, checked in order; the first match names the reason.
struct EscalationRule {
    keywords: &'static [&'static str],
    /// When set, the finding's type tag must match too.
    required_kind: Option<&'static str>,
    label: &'static str,
}

const ESCALATION_RULES: &[EscalationRule] = &[
    EscalationRule {
        keywords: &["production", "live", "customer-facing"],
        required_kind: Some("security"),
        label: "security finding touches a production/live surface",
    },
    EscalationRule {
        keywords: &["migration", "rewrite", "replace"],
        required_kind: Some("architecture"),
        label: "architectural migration/rewrite proposed",
    },
    EscalationRule {
        keywords: &["customer", "user-facing", "public api"],
        required_kind: None,
        label: "customer or public-api impact",
    },
    EscalationRule {
        keywords: &["data loss", "irreversible", "destructive"],
        required_kind: None,
        label: "irreversible or destructive change",
    },
];

fn contains_any(text: &str, keywords: &'static [&'static str]) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    keywords.iter().find(|k| lowered.contains(**k)).copied()
}

fn plan_priority(report: &Report) -> PlanPriority {
    let f = &report.findings;
    if !f.critical.is_empty() {
        PlanPriority::Critical
    } else if f.high.len() > 3 {
        PlanPriority::High
    } else if !f.high.is_empty() || f.medium.len() > 5 {
        PlanPriority::Medium
    } else {
        PlanPriority::Low
    }
}

fn operational_mode(report: &Report) -> OperationalMode {
    let security_count = report.findings.count_of_kind("security");
    let critical_security = report
        .findings
        .critical
        .iter()
        .any(|f| f.kind.eq_ignore_ascii_case("security"));
    if security_count > 3 || critical_security {
        OperationalMode::Direct
    } else if report.findings.total() > 20 {
        OperationalMode::Hierarchical
    } else {
        OperationalMode::Dispatch
    }
}

fn estimated_hours(report: &Report) -> f64 {
    let f = &report.findings;
    let base = 2.0 * f.critical.len() as f64
        + 1.0 * f.high.len() as f64
        + 0.5 * f.medium.len() as f64
        + 0.25 * f.low.len() as f64;
    base * 1.2
}

fn estimated_agents(hours: f64, mode: OperationalMode) -> u32 {
    if hours < 2.0 {
        1
    } else if hours < 8.0 {
        2
    } else if mode == OperationalMode::Hierarchical {
        1 + (hours / 4.0).floor() as u32
    } else {
        (hours / 4.0).floor() as u32 + 1
    }
}

fn escalation_reason(report: &Report) -> Option<String> {
    for rule in ESCALATION_RULES {
        for (_, finding) in report.findings.iter_all() {
            if let Some(kind) = rule.required_kind {
                if !finding.kind.eq_ignore_ascii_case(kind) {
                    continue;
                }
            }
            if let Some(keyword) = contains_any(&finding.description, rule.keywords) {
                return Some(format!("{} (\"{}\" in {})", rule.label, keyword, finding.id));
            }
        }
    }
    None
}

fn planned_actions(report: &Report, plan_id: &str) -> Vec<PlannedAction> {
    let mut actions = Vec::new();
    let mut push = |text: &str, horizon: ActionHorizon, idx: usize| {
        let (hours, requires_security, requires_opus) = match horizon {
            ActionHorizon::Immediate => (
                1.5,
                contains_any(text, SECURITY_KEYWORDS).is_some(),
                contains_any(text, ARCHITECTURE_KEYWORDS).is_some(),
            ),
            ActionHorizon::ShortTerm => {
                (3.0, false, contains_any(text, ARCHITECTURE_KEYWORDS).is_some())
            }
            ActionHorizon::LongTerm => (8.0, false, true),
        };
        actions.push(PlannedAction {
            id: format!("{plan_id}-a{idx}"),
            description: text.to_string(),
            horizon,
            estimated_hours: hours,
            requires_security,
            requires_opus,
        });
    };

    let mut idx = 0;
    for text in &report.recommendations.immediate {
        push(text, ActionHorizon::Immediate, idx);
        idx += 1;
    }
    for text in &report.recommendations.short_term {
        push(text, ActionHorizon::ShortTerm, idx);
        idx += 1;
    }
    for text in &report.recommendations.long_term {
        push(text, ActionHorizon::LongTerm, idx);
        idx += 1;
    }
    actions
}

fn finding_ids_for(report: &Report, horizon: ActionHorizon) -> Vec<String> {
    let severities: &[Severity] = match horizon {
        ActionHorizon::Immediate => &[Severity::Critical, Severity::High],
        ActionHorizon::ShortTerm => &[Severity::Medium],
        ActionHorizon::LongTerm => &[Severity::Low],
    };
    severities
        .iter()
        .flat_map(|s| report.findings.bucket(*s).iter().map(|f| f.id.clone()))
        .collect()
}

fn recommend_agent(action: &PlannedAction) -> &'static str {
    match (action.requires_security, action.requires_opus) {
        (true, true) => "OpusRed",
        (true, false) => "SNTRed",
        (false, true) => "OpusGreen",
        (false, false) => "SNTGreen",
    }
}

/// Produce the action plan for a report.
pub fn analyze(report: &Report) -> ActionPlan {
    let plan_id = format!("plan-{}", uuid::Uuid::new_v4());
    let report_id = format!("{}-{}", report.agent_id, report.timestamp.timestamp());

    let priority = plan_priority(report);
    let mode = operational_mode(report);
    let hours = estimated_hours(report);
    let agents = estimated_agents(hours, mode);
    let actions = planned_actions(report, &plan_id);
    let reason = escalation_reason(report);

    let recommendations = actions
        .iter()
        .enumerate()
        .map(|(i, action)| AgentRecommendation {
            agent_type: recommend_agent(action).to_string(),
            priority: i as u32 + 1,
            task: action.description.clone(),
            rationale: Some(format!(
                "{:?} action from {} recon of {}",
                action.horizon, report.mission, report.environment
            )),
            finding_ids: finding_ids_for(report, action.horizon),
        })
        .collect();

    ActionPlan {
        id: plan_id,
        report_id,
        mode,
        priority,
        actions,
        estimated_agents: agents,
        estimated_hours: hours,
        requires_human: reason.is_some(),
        escalation_reason: reason,
        recommendations,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::{Finding, FindingBuckets, Recommendations, Report, ReportSummary};

    fn finding(id: &str, kind: &str, description: &str) -> Finding {
        Finding {
            id: id.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            location: None,
            recommendation: None,
        }
    }

    fn report(findings: FindingBuckets, recommendations: Recommendations) -> Report {
        Report {
            agent_id: "recon-1".into(),
            environment: "proj".into(),
            mission: "sweep".into(),
            timestamp: chrono::DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            findings,
            summary: ReportSummary::default(),
            recommendations,
        }
    }

    #[test]
    fn critical_security_in_production_escalates_in_direct_mode() {
        let r = report(
            FindingBuckets {
                critical: vec![finding(
                    "f-1",
                    "security",
                    "SQL injection reachable from the production login form",
                )],
                ..Default::default()
            },
            Recommendations {
                immediate: vec!["patch the injection vulnerability".into()],
                ..Default::default()
            },
        );
        let plan = analyze(&r);
        assert_eq!(plan.priority, PlanPriority::Critical);
        assert_eq!(plan.mode, OperationalMode::Direct);
        assert!(plan.requires_human);
        assert!(plan.escalation_reason.as_ref().unwrap().contains("production"));
    }

    #[test]
    fn many_findings_select_hierarchical_mode() {
        let medium: Vec<Finding> = (0..25)
            .map(|i| finding(&format!("f-{i}"), "code_quality", "nested conditionals"))
            .collect();
        let r = report(
            FindingBuckets {
                medium,
                ..Default::default()
            },
            Recommendations::default(),
        );
        let plan = analyze(&r);
        assert_eq!(plan.mode, OperationalMode::Hierarchical);
        assert!(!plan.requires_human);
    }

    #[test]
    fn more_than_three_security_findings_select_direct_mode() {
        let high: Vec<Finding> = (0..4)
            .map(|i| finding(&format!("f-{i}"), "security", "weak hashing"))
            .collect();
        let r = report(
            FindingBuckets {
                high,
                ..Default::default()
            },
            Recommendations::default(),
        );
        assert_eq!(analyze(&r).mode, OperationalMode::Direct);
    }

    #[test]
    fn priority_tiers() {
        let high = |n: usize| -> Vec<Finding> {
            (0..n).map(|i| finding(&format!("h{i}"), "code_quality", "x")).collect()
        };
        let medium = |n: usize| -> Vec<Finding> {
            (0..n).map(|i| finding(&format!("m{i}"), "code_quality", "x")).collect()
        };

        let p = |buckets| analyze(&report(buckets, Recommendations::default())).priority;
        assert_eq!(
            p(FindingBuckets { high: high(4), ..Default::default() }),
            PlanPriority::High
        );
        assert_eq!(
            p(FindingBuckets { high: high(1), ..Default::default() }),
            PlanPriority::Medium
        );
        assert_eq!(
            p(FindingBuckets { medium: medium(6), ..Default::default() }),
            PlanPriority::Medium
        );
        assert_eq!(
            p(FindingBuckets { medium: medium(2), ..Default::default() }),
            PlanPriority::Low
        );
    }

    #[test]
    fn effort_formula_with_buffer() {
        let r = report(
            FindingBuckets {
                critical: vec![finding("c1", "x", ""), finding("c2", "x", "")],
                high: vec![finding("h1", "x", ""), finding("h2", "x", "")],
                medium: vec![
                    finding("m1", "x", ""),
                    finding("m2", "x", ""),
                    finding("m3", "x", ""),
                ],
                low: vec![finding("l1", "x", "")],
            },
            Recommendations::default(),
        );
        let plan = analyze(&r);
        // (2*2 + 1*2 + 0.5*3 + 0.25*1) * 1.2
        assert!((plan.estimated_hours - 9.3).abs() < 1e-9);
        assert_eq!(plan.estimated_agents, (9.3f64 / 4.0).floor() as u32 + 1);
    }

    #[test]
    fn agent_count_tiers() {
        assert_eq!(estimated_agents(1.0, OperationalMode::Dispatch), 1);
        assert_eq!(estimated_agents(5.0, OperationalMode::Dispatch), 2);
        assert_eq!(estimated_agents(12.0, OperationalMode::Dispatch), 4);
        assert_eq!(estimated_agents(12.0, OperationalMode::Hierarchical), 4);
        assert_eq!(estimated_agents(16.0, OperationalMode::Hierarchical), 5);
    }

    #[test]
    fn actions_flag_keywords_per_horizon() {
        let r = report(
            FindingBuckets::default(),
            Recommendations {
                immediate: vec![
                    "fix XSS vulnerability in templates".into(),
                    "refactor the session design".into(),
                ],
                short_term: vec!["redesign the module architecture".into()],
                long_term: vec!["rewrite documentation".into()],
            },
        );
        let plan = analyze(&r);
        assert_eq!(plan.actions.len(), 4);

        let xss = &plan.actions[0];
        assert!(xss.requires_security && !xss.requires_opus);
        assert_eq!(xss.estimated_hours, 1.5);

        let refactor = &plan.actions[1];
        assert!(!refactor.requires_security && refactor.requires_opus);

        let arch = &plan.actions[2];
        assert!(arch.requires_opus);
        assert_eq!(arch.estimated_hours, 3.0);

        let long = &plan.actions[3];
        assert!(long.requires_opus, "long-term actions always need opus");
        assert_eq!(long.estimated_hours, 8.0);
    }

    #[test]
    fn recommendations_map_flags_to_agent_types_with_priorities() {
        let r = report(
            FindingBuckets {
                critical: vec![finding("c1", "security", "token leak")],
                ..Default::default()
            },
            Recommendations {
                immediate: vec![
                    "patch injection vulnerability in the auth architecture".into(),
                    "rotate leaked security tokens".into(),
                    "tidy the changelog".into(),
                ],
                long_term: vec!["plan next quarter".into()],
                ..Default::default()
            },
        );
        let plan = analyze(&r);
        let types: Vec<&str> = plan
            .recommendations
            .iter()
            .map(|r| r.agent_type.as_str())
            .collect();
        assert_eq!(types, vec!["OpusRed", "SNTRed", "SNTGreen", "OpusGreen"]);
        let priorities: Vec<u32> = plan.recommendations.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
        // Immediate recommendations carry the critical finding ids.
        assert_eq!(plan.recommendations[0].finding_ids, vec!["c1"]);
    }

    #[test]
    fn analyze_is_stable_for_fixed_input() {
        let r = report(
            FindingBuckets {
                high: vec![finding("h1", "security", "weak cipher")],
                ..Default::default()
            },
            Recommendations {
                immediate: vec!["replace the cipher".into()],
                ..Default::default()
            },
        );
        let a = analyze(&r);
        let b = analyze(&r);
        assert_eq!(a.priority, b.priority);
        assert_eq!(a.mode, b.mode);
        assert_eq!(a.estimated_hours, b.estimated_hours);
        assert_eq!(a.estimated_agents, b.estimated_agents);
        assert_eq!(a.requires_human, b.requires_human);
        assert_eq!(
            a.recommendations.iter().map(|r| &r.agent_type).collect::<Vec<_>>(),
            b.recommendations.iter().map(|r| &r.agent_type).collect::<Vec<_>>()
        );
    }

    #[test]
    fn escalation_rules_check_type_and_keywords() {
        // "migration" without an architecture type does not trip rule two.
        let r = report(
            FindingBuckets {
                low: vec![finding("l1", "code_quality", "database migration helper is slow")],
                ..Default::default()
            },
            Recommendations::default(),
        );
        assert!(!analyze(&r).requires_human);

        let r2 = report(
            FindingBuckets {
                low: vec![finding("l1", "architecture", "full rewrite of the storage layer")],
                ..Default::default()
            },
            Recommendations::default(),
        );
        let plan = analyze(&r2);
        assert!(plan.requires_human);
        assert!(plan.escalation_reason.unwrap().contains("rewrite"));
    }

    #[test]
    fn destructive_changes_escalate_regardless_of_type() {
        let r = report(
            FindingBuckets {
                medium: vec![finding("m1", "code_quality", "cleanup job causes data loss on retry")],
                ..Default::default()
            },
            Recommendations::default(),
        );
        let plan = analyze(&r);
        assert!(plan.requires_human);
        assert!(plan.escalation_reason.unwrap().contains("data loss"));
    }
}
