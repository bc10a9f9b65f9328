//! Missions, action plans, and dispatch records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Recon,
    Analysis,
    Implementation,
    Testing,
    Planning,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Recon => "recon",
            Self::Analysis => "analysis",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Planning => "planning",
        };
        write!(f, "{s}")
    }
}

/// Where a mission sits in the captain's queue.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    ReconComplete,
    Escalated,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Terminal states are never re-imported after a restart.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A unit of work the captain is tracking.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub requires_human: bool,
    #[serde(default)]
    pub needs_recon: bool,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlanPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for PlanPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// How the captain runs the resulting work.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationalMode {
    /// Tight supervision, captain drives each agent.
    Direct,
    /// Delegated queue, agents work independently.
    Dispatch,
    /// Lead agent coordinates workers.
    Hierarchical,
}

impl std::fmt::Display for OperationalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Dispatch => "dispatch",
            Self::Hierarchical => "hierarchical",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionHorizon {
    Immediate,
    ShortTerm,
    LongTerm,
}

/// One planned action derived from a report recommendation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannedAction {
    pub id: String,
    pub description: String,
    pub horizon: ActionHorizon,
    pub estimated_hours: f64,
    pub requires_security: bool,
    pub requires_opus: bool,
}

/// Which agent configuration should take an action, and with what kickoff text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentRecommendation {
    pub agent_type: String,
    pub priority: u32,
    pub task: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub finding_ids: Vec<String>,
}

/// The decision engine's output for one report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: String,
    pub report_id: String,
    pub mode: OperationalMode,
    pub priority: PlanPriority,
    pub actions: Vec<PlannedAction>,
    pub estimated_agents: u32,
    pub estimated_hours: f64,
    pub requires_human: bool,
    #[serde(default)]
    pub escalation_reason: Option<String>,
    pub recommendations: Vec<AgentRecommendation>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate state of an in-flight plan execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Spawning,
    Running,
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

/// Per-agent sub-status within a dispatch.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpawnStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpawnedAgent {
    #[serde(default)]
    pub agent_id: Option<String>,
    pub config_name: String,
    pub status: SpawnStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub spawned_at: DateTime<Utc>,
}

/// An in-flight execution of an action plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: String,
    pub plan_id: String,
    pub mode: OperationalMode,
    pub agents: Vec<SpawnedAgent>,
    pub started_at: DateTime<Utc>,
    pub status: DispatchStatus,
}

impl Dispatch {
    /// Recompute aggregate counts from the current sub-statuses.
    pub fn counts(&self) -> DispatchCounts {
        let mut c = DispatchCounts::default();
        for a in &self.agents {
            match a.status {
                SpawnStatus::Pending => c.pending += 1,
                SpawnStatus::Running => c.running += 1,
                SpawnStatus::Completed => c.completed += 1,
                SpawnStatus::Failed => c.failed += 1,
                SpawnStatus::Stopped => c.stopped += 1,
            }
        }
        c
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}
