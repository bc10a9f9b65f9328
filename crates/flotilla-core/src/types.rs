//! Runtime data model — agents, metrics, alerts, requests, activity, context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a supervised agent process.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Spawning,
    Connected,
    Working,
    Idle,
    Blocked,
    Disconnected,
    Stopping,
    Stopped,
    Crashed,
}

impl AgentStatus {
    /// Statuses in which the agent is expected to hold a live process.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Working | Self::Idle | Self::Blocked
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spawning => "spawning",
            Self::Connected => "connected",
            Self::Working => "working",
            Self::Idle => "idle",
            Self::Blocked => "blocked",
            Self::Disconnected => "disconnected",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        write!(f, "{s}")
    }
}

/// What a tool-call session is allowed to do.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessLevel {
    #[default]
    #[serde(rename = "user")]
    User,
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "readonly-all")]
    ReadonlyAll,
}

impl AccessLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "readonly-all" => Some(Self::ReadonlyAll),
            _ => None,
        }
    }
}

/// A supervised external CLI agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub config_name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub status: AgentStatus,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub pane: Option<String>,
    pub spawned_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub shutdown_requested_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, role: impl Into<String>, config_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role: role.into(),
            config_name: config_name.into(),
            color: None,
            status: AgentStatus::Spawning,
            current_task: None,
            pid: None,
            pane: None,
            spawned_at: now,
            last_seen: now,
            shutdown_requested_at: None,
        }
    }
}

/// Cumulative per-agent counters. Monotonic.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent_id: String,
    pub tokens_used: u64,
    pub reports_submitted: u32,
    pub failed_tests: u32,
    pub consecutive_rejects: u32,
    #[serde(default)]
    pub model: Option<String>,
    pub estimated_cost: f64,
}

impl AgentMetrics {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

/// A point-in-time copy of an agent's metrics, kept in a bounded history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub metrics: AgentMetrics,
}

/// A question an agent needs a human to answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HumanInputRequest {
    pub id: String,
    pub agent_id: String,
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub answered: bool,
    #[serde(default)]
    pub answer: Option<String>,
}

impl HumanInputRequest {
    pub fn new(agent_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            question: question.into(),
            context: None,
            created_at: Utc::now(),
            answered: false,
            answer: None,
        }
    }
}

/// Why an agent is asking to stop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TaskComplete,
    Blocked,
    Error,
    NeedsInput,
}

/// An agent's request to shut down, pending human or captain review.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StopApprovalRequest {
    pub id: String,
    pub agent_id: String,
    pub reason: StopReason,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub work_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed: bool,
    pub approved: bool,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

impl StopApprovalRequest {
    pub fn new(agent_id: impl Into<String>, reason: StopReason) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            reason,
            context: None,
            work_summary: None,
            created_at: Utc::now(),
            reviewed: false,
            approved: false,
            response: None,
            reviewer: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// A condition surfaced to the dashboard.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: String,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(kind: impl Into<String>, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            severity,
            agent_id: None,
            message: message.into(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// One row of the bounded activity ring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: u64,
    pub agent_id: String,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted key/value context item the captain uses to rebuild session state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ContextEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// Agent health thresholds, adjustable at runtime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thresholds {
    pub failed_tests_max: u32,
    pub idle_time_max_seconds: u64,
    pub token_usage_max: u64,
    pub consecutive_rejects_max: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            failed_tests_max: 5,
            idle_time_max_seconds: 600,
            token_usage_max: 100_000,
            consecutive_rejects_max: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_live_set() {
        assert!(AgentStatus::Working.is_live());
        assert!(AgentStatus::Blocked.is_live());
        assert!(!AgentStatus::Spawning.is_live());
        assert!(!AgentStatus::Stopped.is_live());
    }

    #[test]
    fn access_level_wire_names() {
        assert_eq!(AccessLevel::parse("readonly-all"), Some(AccessLevel::ReadonlyAll));
        assert_eq!(AccessLevel::parse("admin"), Some(AccessLevel::Admin));
        assert_eq!(AccessLevel::parse("root"), None);
        assert_eq!(
            serde_json::to_string(&AccessLevel::ReadonlyAll).unwrap(),
            r#""readonly-all""#
        );
    }

    #[test]
    fn thresholds_defaults() {
        let t = Thresholds::default();
        assert_eq!(t.failed_tests_max, 5);
        assert_eq!(t.idle_time_max_seconds, 600);
        assert_eq!(t.token_usage_max, 100_000);
        assert_eq!(t.consecutive_rejects_max, 3);
    }

    #[test]
    fn context_entry_expiry() {
        let now = Utc::now();
        let live = ContextEntry {
            key: "k".into(),
            value: "v".into(),
            priority: 0,
            expires_at: None,
        };
        assert!(!live.is_expired(now));
        let expired = ContextEntry {
            expires_at: Some(now - chrono::Duration::seconds(1)),
            ..live.clone()
        };
        assert!(expired.is_expired(now));
    }

    #[test]
    fn new_agent_starts_spawning_without_handles() {
        let a = Agent::new("team-sntgreen001", "SNTGreen", "SNTGreen");
        assert_eq!(a.status, AgentStatus::Spawning);
        assert!(a.pid.is_none());
        assert!(a.pane.is_none());
    }
}
