//! Core types for flotilla — shared data model, wire protocol, errors, config.

pub mod config;
pub mod error;
pub mod plan;
pub mod protocol;
pub mod report;
pub mod types;

pub use config::{id_prefix_for, AgentConfig, ConfigRegistry, CoordinatorConfig};
pub use error::{Error, Result};
pub use plan::{
    ActionHorizon, ActionPlan, AgentRecommendation, Dispatch, DispatchStatus, Mission,
    OperationalMode, PlanPriority, PlannedAction, SpawnStatus, SpawnedAgent, TaskStatus, TaskType,
};
pub use protocol::{CaptainSignal, EventMessage, RpcError, RpcRequest, RpcResponse};
pub use report::{Finding, FindingBuckets, Recommendations, Report, ReportSummary, Severity};
pub use types::{
    AccessLevel, ActivityLogEntry, Agent, AgentMetrics, AgentStatus, Alert, AlertSeverity,
    ContextEntry, HumanInputRequest, MetricsSnapshot, StopApprovalRequest, StopReason, Thresholds,
};
