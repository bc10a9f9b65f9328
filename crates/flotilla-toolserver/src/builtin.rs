//! Built-in tool operations.
//!
//! Each operation is a small handler struct wired with the state store, the
//! pane controller, or the captain mailbox. The transport never sees these
//! types — only the registry does.

use std::sync::Arc;

use flotilla_core::{
    AgentStatus, Alert, AlertSeverity, ContextEntry, Error, HumanInputRequest, Result,
    StopApprovalRequest, StopReason,
};
use flotilla_panes::PaneController;
use flotilla_state::StateStore;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

use crate::registry::{parse_params, ToolContext, ToolHandler, ToolRegistry};

pub use flotilla_core::CaptainSignal;

/// Register every mandatory operation on the given registry.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    store: Arc<StateStore>,
    panes: Arc<dyn PaneController>,
    captain_tx: mpsc::Sender<CaptainSignal>,
) {
    registry.register(RegisterAgent { store: store.clone() });
    registry.register(ReportStatus { store: store.clone() });
    registry.register(ReportMetrics { store: store.clone() });
    registry.register(LogActivity { store: store.clone() });
    registry.register(RequestHumanInput { store: store.clone() });
    registry.register(RequestStopApproval { store: store.clone() });
    registry.register(SignalCaptain {
        store: store.clone(),
        captain_tx: captain_tx.clone(),
    });
    registry.register(SaveContext { store: store.clone() });
    registry.register(GetContext { store: store.clone() });
    registry.register(GetAllContext { store: store.clone() });
    registry.register(SubmitReconReport {
        store,
        captain_tx,
    });
    registry.register(ListPanes { panes: panes.clone() });
    registry.register(GetText { panes: panes.clone() });
    registry.register(SendText { panes: panes.clone() });
    registry.register(ClosePane { panes: panes.clone() });
    registry.register(ClosePanes { panes });
}

/// Rough per-model cost in dollars per million tokens.
const MODEL_RATES: &[(&str, f64)] = &[("opus", 15.0), ("sonnet", 3.0), ("haiku", 0.8)];
const DEFAULT_RATE: f64 = 3.0;

fn estimate_cost(model: Option<&str>, tokens: u64) -> f64 {
    let rate = model
        .and_then(|m| {
            MODEL_RATES
                .iter()
                .find(|(name, _)| m.to_ascii_lowercase().contains(name))
                .map(|(_, r)| *r)
        })
        .unwrap_or(DEFAULT_RATE);
    tokens as f64 / 1_000_000.0 * rate
}

// ---------------------------------------------------------------------------
// register_agent — the agent's first call after connecting
// ---------------------------------------------------------------------------

struct RegisterAgent {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for RegisterAgent {
    fn name(&self) -> &str {
        "register_agent"
    }
    fn description(&self) -> &str {
        "Confirm the agent is up; transitions it to connected"
    }
    fn params_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn call(&self, ctx: &ToolContext, _params: Value) -> Result<Value> {
        let agent = self
            .store
            .set_agent_status(ctx.agent_id(), AgentStatus::Connected)
            .await?;
        self.store
            .append_activity(ctx.agent_id(), "registered", "")
            .await;
        info!("agent {} registered", ctx.agent_id());
        Ok(json!({
            "agent_id": agent.id,
            "config": agent.config_name,
            "pane": agent.pane,
            "thresholds": self.store.thresholds().await,
        }))
    }
}

// ---------------------------------------------------------------------------
// report_status
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReportStatusParams {
    status: String,
    #[serde(default)]
    task: Option<String>,
}

struct ReportStatus {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for ReportStatus {
    fn name(&self) -> &str {
        "report_status"
    }
    fn description(&self) -> &str {
        "Update the agent's status and current task"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["working", "idle", "blocked"] },
                "task": { "type": "string" }
            },
            "required": ["status"]
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: ReportStatusParams = parse_params(params)?;
        let status = match p.status.as_str() {
            "working" => AgentStatus::Working,
            "idle" => AgentStatus::Idle,
            "blocked" => AgentStatus::Blocked,
            other => {
                return Err(Error::invalid_input(format!("status not reportable: {other}")))
            }
        };
        self.store
            .update_agent(ctx.agent_id(), |a| {
                a.status = status;
                a.last_seen = chrono::Utc::now();
                if let Some(task) = &p.task {
                    a.current_task = Some(task.clone());
                }
            })
            .await?;
        Ok(json!({ "ok": true }))
    }
}

// ---------------------------------------------------------------------------
// report_metrics — cumulative totals; the store keeps them monotonic
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReportMetricsParams {
    #[serde(default)]
    tokens_used: Option<u64>,
    #[serde(default)]
    reports_submitted: Option<u32>,
    #[serde(default)]
    failed_tests: Option<u32>,
    #[serde(default)]
    consecutive_rejects: Option<u32>,
    #[serde(default)]
    model: Option<String>,
}

struct ReportMetrics {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for ReportMetrics {
    fn name(&self) -> &str {
        "report_metrics"
    }
    fn description(&self) -> &str {
        "Report cumulative token/test/reject counters"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tokens_used": { "type": "integer" },
                "reports_submitted": { "type": "integer" },
                "failed_tests": { "type": "integer" },
                "consecutive_rejects": { "type": "integer" },
                "model": { "type": "string" }
            }
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: ReportMetricsParams = parse_params(params)?;
        let metrics = self
            .store
            .update_metrics(ctx.agent_id(), |m| {
                if let Some(t) = p.tokens_used {
                    m.tokens_used = m.tokens_used.max(t);
                }
                if let Some(r) = p.reports_submitted {
                    m.reports_submitted = m.reports_submitted.max(r);
                }
                if let Some(f) = p.failed_tests {
                    m.failed_tests = m.failed_tests.max(f);
                }
                if let Some(c) = p.consecutive_rejects {
                    // Reject streaks reset on acceptance, so this one may go down.
                    m.consecutive_rejects = c;
                }
                if let Some(model) = &p.model {
                    m.model = Some(model.clone());
                }
                m.estimated_cost = estimate_cost(m.model.as_deref(), m.tokens_used);
            })
            .await?;
        self.store.touch_agent(ctx.agent_id()).await?;
        Ok(json!({ "ok": true, "estimated_cost": metrics.estimated_cost }))
    }
}

// ---------------------------------------------------------------------------
// log_activity
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LogActivityParams {
    action: String,
    #[serde(default)]
    details: Option<String>,
}

struct LogActivity {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for LogActivity {
    fn name(&self) -> &str {
        "log_activity"
    }
    fn description(&self) -> &str {
        "Append a line to the activity log"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string" },
                "details": { "type": "string" }
            },
            "required": ["action"]
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: LogActivityParams = parse_params(params)?;
        let id = self
            .store
            .append_activity(ctx.agent_id(), &p.action, p.details.as_deref().unwrap_or(""))
            .await;
        self.store.touch_agent(ctx.agent_id()).await.ok();
        Ok(json!({ "entry_id": id }))
    }
}

// ---------------------------------------------------------------------------
// request_human_input
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct HumanInputParams {
    question: String,
    #[serde(default)]
    context: Option<String>,
}

struct RequestHumanInput {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for RequestHumanInput {
    fn name(&self) -> &str {
        "request_human_input"
    }
    fn description(&self) -> &str {
        "Ask a question only a human can answer"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "context": { "type": "string" }
            },
            "required": ["question"]
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: HumanInputParams = parse_params(params)?;
        let mut request = HumanInputRequest::new(ctx.agent_id(), &p.question);
        request.context = p.context;
        let id = self.store.add_human_input(request).await;
        self.store
            .add_alert(
                Alert::new("human_input", AlertSeverity::Warning, &p.question)
                    .for_agent(ctx.agent_id()),
            )
            .await;
        Ok(json!({ "request_id": id }))
    }
}

// ---------------------------------------------------------------------------
// request_stop_approval
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StopApprovalParams {
    reason: StopReason,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    work_summary: Option<String>,
}

struct RequestStopApproval {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for RequestStopApproval {
    fn name(&self) -> &str {
        "request_stop_approval"
    }
    fn description(&self) -> &str {
        "Ask permission to stop working"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "enum": ["task_complete", "blocked", "error", "needs_input"]
                },
                "context": { "type": "string" },
                "work_summary": { "type": "string" }
            },
            "required": ["reason"]
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: StopApprovalParams = parse_params(params)?;
        let mut request = StopApprovalRequest::new(ctx.agent_id(), p.reason);
        request.context = p.context;
        request.work_summary = p.work_summary;
        let id = self.store.add_stop_approval(request).await;
        self.store
            .append_activity(ctx.agent_id(), "stop_requested", &format!("{:?}", p.reason))
            .await;
        Ok(json!({ "request_id": id }))
    }
}

// ---------------------------------------------------------------------------
// signal_captain
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SignalCaptainParams {
    message: String,
}

struct SignalCaptain {
    store: Arc<StateStore>,
    captain_tx: mpsc::Sender<CaptainSignal>,
}

#[async_trait::async_trait]
impl ToolHandler for SignalCaptain {
    fn name(&self) -> &str {
        "signal_captain"
    }
    fn description(&self) -> &str {
        "Send a free-text message to the captain"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: SignalCaptainParams = parse_params(params)?;
        self.captain_tx
            .send(CaptainSignal::Message {
                agent_id: ctx.agent_id().to_string(),
                text: p.message,
            })
            .await
            .map_err(|_| Error::Internal("captain mailbox closed".into()))?;
        self.store.touch_agent(ctx.agent_id()).await.ok();
        Ok(json!({ "ok": true }))
    }
}

// ---------------------------------------------------------------------------
// save_context / get_context / get_all_context
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SaveContextParams {
    key: String,
    value: String,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

struct SaveContext {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for SaveContext {
    fn name(&self) -> &str {
        "save_context"
    }
    fn description(&self) -> &str {
        "Persist a context entry that survives restarts"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "type": "string" },
                "priority": { "type": "integer" },
                "ttl_seconds": { "type": "integer" }
            },
            "required": ["key", "value"]
        })
    }
    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: SaveContextParams = parse_params(params)?;
        let entry = ContextEntry {
            key: p.key,
            value: p.value,
            priority: p.priority.unwrap_or(0),
            expires_at: p
                .ttl_seconds
                .map(|s| chrono::Utc::now() + chrono::Duration::seconds(s)),
        };
        self.store.save_context(entry).await;
        Ok(json!({ "ok": true }))
    }
}

#[derive(Deserialize)]
struct GetContextParams {
    key: String,
}

struct GetContext {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for GetContext {
    fn name(&self) -> &str {
        "get_context"
    }
    fn description(&self) -> &str {
        "Read one context entry"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "key": { "type": "string" } },
            "required": ["key"]
        })
    }
    fn read_only(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: GetContextParams = parse_params(params)?;
        match self.store.get_context(&p.key).await {
            Some(entry) => Ok(json!({ "key": entry.key, "value": entry.value })),
            None => Ok(json!({ "key": p.key, "value": null })),
        }
    }
}

struct GetAllContext {
    store: Arc<StateStore>,
}

#[async_trait::async_trait]
impl ToolHandler for GetAllContext {
    fn name(&self) -> &str {
        "get_all_context"
    }
    fn description(&self) -> &str {
        "Read all live context entries, highest priority first"
    }
    fn params_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn read_only(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<Value> {
        let entries = self.store.all_context().await;
        Ok(serde_json::to_value(entries)?)
    }
}

// ---------------------------------------------------------------------------
// submit_recon_report — raw payload forwarded to the captain for parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SubmitReconParams {
    report: Value,
}

struct SubmitReconReport {
    store: Arc<StateStore>,
    captain_tx: mpsc::Sender<CaptainSignal>,
}

#[async_trait::async_trait]
impl ToolHandler for SubmitReconReport {
    fn name(&self) -> &str {
        "submit_recon_report"
    }
    fn description(&self) -> &str {
        "Submit a structured recon report for planning"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "report": {} },
            "required": ["report"]
        })
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: SubmitReconParams = parse_params(params)?;
        self.captain_tx
            .send(CaptainSignal::ReconReport {
                agent_id: ctx.agent_id().to_string(),
                payload: p.report,
            })
            .await
            .map_err(|_| Error::Internal("captain mailbox closed".into()))?;
        self.store
            .update_metrics(ctx.agent_id(), |m| m.reports_submitted += 1)
            .await
            .ok();
        self.store
            .append_activity(ctx.agent_id(), "recon_report", "")
            .await;
        Ok(json!({ "ok": true }))
    }
}

// ---------------------------------------------------------------------------
// Pane passthroughs
// ---------------------------------------------------------------------------

struct ListPanes {
    panes: Arc<dyn PaneController>,
}

#[async_trait::async_trait]
impl ToolHandler for ListPanes {
    fn name(&self) -> &str {
        "list_panes"
    }
    fn description(&self) -> &str {
        "List multiplexer panes"
    }
    fn params_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn read_only(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<Value> {
        let panes = self.panes.list_panes().await?;
        Ok(serde_json::to_value(panes)?)
    }
}

#[derive(Deserialize)]
struct GetTextParams {
    pane: String,
    #[serde(default)]
    lines: Option<u32>,
}

struct GetText {
    panes: Arc<dyn PaneController>,
}

#[async_trait::async_trait]
impl ToolHandler for GetText {
    fn name(&self) -> &str {
        "get_text"
    }
    fn description(&self) -> &str {
        "Read a pane's screen contents"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pane": { "type": "string" },
                "lines": { "type": "integer" }
            },
            "required": ["pane"]
        })
    }
    fn read_only(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: GetTextParams = parse_params(params)?;
        let text = self.panes.read_screen(&p.pane, p.lines).await?;
        Ok(json!({ "pane": p.pane, "text": text }))
    }
}

#[derive(Deserialize)]
struct SendTextParams {
    pane: String,
    text: String,
}

struct SendText {
    panes: Arc<dyn PaneController>,
}

#[async_trait::async_trait]
impl ToolHandler for SendText {
    fn name(&self) -> &str {
        "send_text"
    }
    fn description(&self) -> &str {
        "Type a line into a pane"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pane": { "type": "string" },
                "text": { "type": "string" }
            },
            "required": ["pane", "text"]
        })
    }
    fn requires_admin(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: SendTextParams = parse_params(params)?;
        self.panes.send_text(&p.pane, &p.text).await?;
        Ok(json!({ "ok": true }))
    }
}

#[derive(Deserialize)]
struct ClosePaneParams {
    pane: String,
}

struct ClosePane {
    panes: Arc<dyn PaneController>,
}

#[async_trait::async_trait]
impl ToolHandler for ClosePane {
    fn name(&self) -> &str {
        "close_pane"
    }
    fn description(&self) -> &str {
        "Close one pane"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "pane": { "type": "string" } },
            "required": ["pane"]
        })
    }
    fn requires_admin(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: ClosePaneParams = parse_params(params)?;
        self.panes.close_pane(&p.pane).await?;
        Ok(json!({ "ok": true }))
    }
}

#[derive(Deserialize)]
struct ClosePanesParams {
    panes: Vec<String>,
}

struct ClosePanes {
    panes: Arc<dyn PaneController>,
}

#[async_trait::async_trait]
impl ToolHandler for ClosePanes {
    fn name(&self) -> &str {
        "close_panes"
    }
    fn description(&self) -> &str {
        "Close a batch of panes, storm-safe"
    }
    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "panes": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["panes"]
        })
    }
    fn requires_admin(&self) -> bool {
        true
    }
    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let p: ClosePanesParams = parse_params(params)?;
        let failed = self.panes.close_panes(&p.panes).await;
        Ok(json!({ "closed": p.panes.len() - failed.len(), "failed": failed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_estimate_uses_model_rates() {
        assert_eq!(estimate_cost(Some("claude-opus-4"), 1_000_000), 15.0);
        assert_eq!(estimate_cost(Some("sonnet"), 2_000_000), 6.0);
        assert_eq!(estimate_cost(None, 1_000_000), DEFAULT_RATE);
        assert_eq!(estimate_cost(Some("mystery"), 0), 0.0);
    }
}
