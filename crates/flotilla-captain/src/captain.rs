//! The captain loop — periodic orchestration cycle.
//!
//! Each cycle: drain agent signals, import tasks, run recon for tasks that
//! need it, plan and dispatch, health-check running agents, surface
//! escalations. The first cycle runs immediately; later cycles tick on the
//! configured period until the cancellation token fires.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_core::{
    ActionPlan, AgentRecommendation, Alert, AlertSeverity, CaptainSignal, Error, Mission,
    OperationalMode, PlanPriority, Report, Result, TaskStatus, TaskType,
};
use flotilla_panes::PaneController;
use flotilla_state::StateStore;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::memory::{sanitize_environment, MemoryStore};
use crate::recon::{purpose_hash_name, ReconChild, ReconRunner};
use crate::tasks::{TaskSource, TaskSpec};
use crate::{analyze, parser};

#[derive(Clone, Debug)]
pub struct CaptainLoopConfig {
    pub cycle_interval: Duration,
    /// No tool call and no pane change for this long means stale.
    pub stale_after: Duration,
}

impl Default for CaptainLoopConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

/// A decision deferred to a human.
#[derive(Clone, Debug, Serialize)]
pub struct Escalation {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ActionPlan>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(skip)]
    notified: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationAction {
    Approve,
    Reject,
    Modify,
}

/// Where unresolved escalations are surfaced (chat channel, pager, log).
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, escalation: &Escalation);
}

/// Default notifier: the structured log.
pub struct TracingNotifier;

#[async_trait::async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, escalation: &Escalation) {
        warn!(
            "escalation {} [{}]: {}",
            escalation.id, escalation.kind, escalation.reason
        );
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CaptainStatus {
    pub running: bool,
    pub cycles: u64,
    #[serde(default)]
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub queued_tasks: usize,
    pub executing_tasks: usize,
    pub pending_escalations: usize,
}

/// Shared handle the HTTP layer and the loop both use.
pub type CaptainHandle = Arc<CaptainLoop>;

struct LoopState {
    tasks: HashMap<String, Mission>,
    reports: HashMap<String, Report>,
    task_dispatches: HashMap<String, String>,
    escalations: Vec<Escalation>,
    pane_hashes: HashMap<String, (u64, DateTime<Utc>)>,
    cycles: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    running: bool,
}

pub struct CaptainLoop {
    store: Arc<StateStore>,
    panes: Arc<dyn PaneController>,
    dispatcher: Arc<Dispatcher>,
    recon: ReconRunner,
    memory: Arc<dyn MemoryStore>,
    task_source: Arc<dyn TaskSource>,
    notifier: Arc<dyn Notifier>,
    signals: Mutex<mpsc::Receiver<CaptainSignal>>,
    config: CaptainLoopConfig,
    state: Mutex<LoopState>,
}

impl CaptainLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        panes: Arc<dyn PaneController>,
        dispatcher: Arc<Dispatcher>,
        recon: ReconRunner,
        memory: Arc<dyn MemoryStore>,
        task_source: Arc<dyn TaskSource>,
        notifier: Arc<dyn Notifier>,
        signals: mpsc::Receiver<CaptainSignal>,
        config: CaptainLoopConfig,
    ) -> CaptainHandle {
        Arc::new(Self {
            store,
            panes,
            dispatcher,
            recon,
            memory,
            task_source,
            notifier,
            signals: Mutex::new(signals),
            config,
            state: Mutex::new(LoopState {
                tasks: HashMap::new(),
                reports: HashMap::new(),
                task_dispatches: HashMap::new(),
                escalations: Vec::new(),
                pane_hashes: HashMap::new(),
                cycles: 0,
                last_cycle_at: None,
                running: false,
            }),
        })
    }

    /// Run until cancelled. The first cycle starts immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.state.lock().await.running = true;
        info!(
            "captain loop started (interval {:?})",
            self.config.cycle_interval
        );
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
                _ = cancel.cancelled() => {
                    self.state.lock().await.running = false;
                    info!("captain loop stopped");
                    return;
                }
            }
        }
    }

    /// One full orchestration cycle.
    pub async fn run_cycle(&self) {
        self.drain_signals().await;
        self.intake().await;
        self.recon_pass().await;
        self.planning_pass().await;
        self.track_dispatches().await;
        self.health_check().await;
        self.process_escalations().await;

        let mut state = self.state.lock().await;
        state.cycles += 1;
        state.last_cycle_at = Some(Utc::now());
        let queued = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();
        info!(
            "captain cycle {} done: {} tasks ({} pending), {} escalations",
            state.cycles,
            state.tasks.len(),
            queued,
            state.escalations.iter().filter(|e| !e.resolved).count()
        );
    }

    // -----------------------------------------------------------------------
    // Signals from the tool-call server
    // -----------------------------------------------------------------------

    async fn drain_signals(&self) {
        let mut signals = self.signals.lock().await;
        while let Ok(signal) = signals.try_recv() {
            match signal {
                CaptainSignal::ReconReport { agent_id, payload } => {
                    match parser::parse_report_value(&payload) {
                        Ok(report) => {
                            info!("recon report from {agent_id}: {} findings", report.findings.total());
                            self.remember_report(&report).await;
                            self.plan_report(report, None).await;
                        }
                        Err(e) => {
                            warn!("recon report from {agent_id} unparseable: {e}");
                            self.store
                                .append_activity(&agent_id, "bad_report", &e.to_string())
                                .await;
                        }
                    }
                }
                CaptainSignal::Message { agent_id, text } => {
                    self.store
                        .append_activity(&agent_id, "signal_captain", &text)
                        .await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 1. Task intake
    // -----------------------------------------------------------------------

    async fn intake(&self) {
        let specs = match self.task_source.fetch().await {
            Ok(specs) => specs,
            Err(e) => {
                warn!("task source fetch failed: {e}");
                return;
            }
        };
        for spec in specs {
            let mission = spec.into_mission();
            if self.store.is_task_completed(&mission.id).await {
                continue;
            }
            let mut state = self.state.lock().await;
            if state.tasks.contains_key(&mission.id) {
                continue;
            }
            info!("task imported: {} ({})", mission.id, mission.title);
            state.tasks.insert(mission.id.clone(), mission);
        }
    }

    /// Submit a task directly (the HTTP surface). Returns the task id.
    pub async fn submit_task(&self, spec: TaskSpec) -> String {
        let mission = spec.into_mission();
        let id = mission.id.clone();
        self.state.lock().await.tasks.insert(id.clone(), mission);
        self.store
            .append_activity("captain", "task_submitted", &id)
            .await;
        id
    }

    pub async fn tasks(&self) -> Vec<Mission> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Mission> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        tasks
    }

    pub async fn get_task(&self, id: &str) -> Option<Mission> {
        self.state.lock().await.tasks.get(id).cloned()
    }

    pub async fn update_task<F>(&self, id: &str, f: F) -> Result<Mission>
    where
        F: FnOnce(&mut Mission),
    {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("task: {id}")))?;
        f(task);
        Ok(task.clone())
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .tasks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("task: {id}")))
    }

    // -----------------------------------------------------------------------
    // 2. Reconnaissance
    // -----------------------------------------------------------------------

    async fn recon_pass(&self) {
        let due: Vec<Mission> = {
            let state = self.state.lock().await;
            state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending && t.needs_recon)
                .cloned()
                .collect()
        };

        for task in due {
            let mission_text = format!("{}: {}", task.title, task.description);
            match self
                .recon
                .run_recon(&mission_text, task.project_path.as_deref())
                .await
            {
                Ok(report) => {
                    self.remember_report(&report).await;
                    let mut state = self.state.lock().await;
                    state.reports.insert(task.id.clone(), report);
                    if let Some(t) = state.tasks.get_mut(&task.id) {
                        t.status = TaskStatus::ReconComplete;
                    }
                }
                Err(e) => {
                    error!("recon for task {} failed: {e}", task.id);
                    self.store
                        .append_activity("captain", "recon_failed", &format!("{}: {e}", task.id))
                        .await;
                    let mut state = self.state.lock().await;
                    if let Some(t) = state.tasks.get_mut(&task.id) {
                        t.status = TaskStatus::Failed;
                    }
                    drop(state);
                    self.store.mark_task_completed(&task.id).await;
                }
            }
        }
    }

    /// Kick off an ad-hoc recon (the HTTP surface). Returns the recon id.
    pub async fn start_recon(self: &Arc<Self>, project_path: &str, mission: Option<&str>) -> String {
        let mission = mission.unwrap_or("general reconnaissance").to_string();
        let recon_id = purpose_hash_name(&mission);
        let this = self.clone();
        let id = recon_id.clone();
        let project_path = project_path.to_string();
        tokio::spawn(async move {
            match this.recon.run_recon_with_id(&id, &mission, Some(&project_path)).await {
                Ok(report) => {
                    this.remember_report(&report).await;
                    this.plan_report(report, Some(&project_path)).await;
                }
                Err(e) => {
                    error!("ad-hoc recon {id} failed: {e}");
                    this.store
                        .append_activity("captain", "recon_failed", &e.to_string())
                        .await;
                }
            }
        });
        recon_id
    }

    pub async fn active_recons(&self) -> Vec<ReconChild> {
        self.recon.active().await
    }

    async fn remember_report(&self, report: &Report) {
        let environment = sanitize_environment(&report.environment);
        let key = format!("recon:{}", report.timestamp.timestamp());
        match serde_json::to_value(report) {
            Ok(value) => {
                if let Err(e) = self.memory.put(&environment, &key, value).await {
                    warn!("memory write failed for {environment}/{key}: {e}");
                }
            }
            Err(e) => warn!("report not serializable for memory: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // 3. Planning
    // -----------------------------------------------------------------------

    async fn planning_pass(&self) {
        // Tasks with a fresh recon report go through the decision engine.
        let ready: Vec<(Mission, Report)> = {
            let state = self.state.lock().await;
            state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::ReconComplete)
                .filter_map(|t| state.reports.get(&t.id).map(|r| (t.clone(), r.clone())))
                .collect()
        };
        for (task, report) in ready {
            let plan = analyze(&report);
            self.plan_report_inner(plan, Some(&task)).await;
        }

        // Tasks that skip recon get a direct single-agent dispatch.
        let direct: Vec<Mission> = {
            let state = self.state.lock().await;
            state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending && !t.needs_recon)
                .cloned()
                .collect()
        };
        for task in direct {
            let plan = direct_plan(&task);
            self.plan_report_inner(plan, Some(&task)).await;
        }
    }

    /// Plan and dispatch an ad-hoc report that has no queued task behind it.
    async fn plan_report(&self, report: Report, project_path: Option<&str>) {
        let plan = analyze(&report);
        if plan.requires_human {
            self.escalate_plan(&plan, None).await;
            return;
        }
        match self.dispatcher.execute_plan(&plan, project_path, false).await {
            Ok(dispatch) => {
                info!("plan {} dispatched as {}", plan.id, dispatch.id);
            }
            Err(e) => error!("dispatching plan {}: {e}", plan.id),
        }
    }

    async fn plan_report_inner(&self, plan: ActionPlan, task: Option<&Mission>) {
        if plan.requires_human {
            self.escalate_plan(&plan, task).await;
            if let Some(task) = task {
                let mut state = self.state.lock().await;
                if let Some(t) = state.tasks.get_mut(&task.id) {
                    t.status = TaskStatus::Escalated;
                    t.requires_human = true;
                }
            }
            return;
        }

        let project_path = task.and_then(|t| t.project_path.clone());
        match self
            .dispatcher
            .execute_plan(&plan, project_path.as_deref(), false)
            .await
        {
            Ok(dispatch) => {
                info!("plan {} dispatched as {}", plan.id, dispatch.id);
                if let Some(task) = task {
                    let mut state = self.state.lock().await;
                    state.task_dispatches.insert(task.id.clone(), dispatch.id.clone());
                    if let Some(t) = state.tasks.get_mut(&task.id) {
                        t.status = TaskStatus::Executing;
                    }
                }
            }
            Err(e) => {
                error!("dispatching plan {}: {e}", plan.id);
                if let Some(task) = task {
                    let mut state = self.state.lock().await;
                    if let Some(t) = state.tasks.get_mut(&task.id) {
                        t.status = TaskStatus::Failed;
                    }
                }
            }
        }
    }

    async fn escalate_plan(&self, plan: &ActionPlan, task: Option<&Mission>) {
        let reason = plan
            .escalation_reason
            .clone()
            .unwrap_or_else(|| "plan requires human review".to_string());
        let escalation = Escalation {
            id: format!("esc-{}", uuid::Uuid::new_v4()),
            kind: "plan_requires_human".to_string(),
            task_id: task.map(|t| t.id.clone()),
            agent_id: None,
            reason: reason.clone(),
            plan: Some(plan.clone()),
            created_at: Utc::now(),
            resolved: false,
            response: None,
            notified: false,
        };
        info!("escalating plan {}: {reason}", plan.id);
        self.store
            .add_alert(Alert::new("escalation", AlertSeverity::Critical, &reason))
            .await;
        self.state.lock().await.escalations.push(escalation);
    }

    // -----------------------------------------------------------------------
    // 3b. Dispatch tracking
    // -----------------------------------------------------------------------

    async fn track_dispatches(&self) {
        let tracked: Vec<(String, String)> = {
            let state = self.state.lock().await;
            state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Executing)
                .filter_map(|t| {
                    state
                        .task_dispatches
                        .get(&t.id)
                        .map(|d| (t.id.clone(), d.clone()))
                })
                .collect()
        };
        for (task_id, dispatch_id) in tracked {
            let Some(dispatch) = self.dispatcher.get_dispatch(&dispatch_id).await else {
                continue;
            };
            let terminal = match dispatch.status {
                flotilla_core::DispatchStatus::Completed => Some(TaskStatus::Completed),
                flotilla_core::DispatchStatus::Failed
                | flotilla_core::DispatchStatus::Aborted
                | flotilla_core::DispatchStatus::Cancelled => Some(TaskStatus::Failed),
                _ => None,
            };
            if let Some(status) = terminal {
                let mut state = self.state.lock().await;
                if let Some(t) = state.tasks.get_mut(&task_id) {
                    t.status = status;
                }
                drop(state);
                self.store.mark_task_completed(&task_id).await;
                info!("task {task_id} finished: {status:?}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Health check
    // -----------------------------------------------------------------------

    async fn health_check(&self) {
        let agents = self.store.list_agents().await;
        let now = Utc::now();
        let stale_after =
            chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::seconds(300));

        for agent in agents.iter().filter(|a| a.status.is_live()) {
            // Pane output counts as liveness even without tool calls.
            let mut last_observed = agent.last_seen;
            if let Some(pane) = &agent.pane {
                if let Ok(screen) = self.panes.read_screen(pane, Some(50)).await {
                    let mut hasher = DefaultHasher::new();
                    screen.trim().hash(&mut hasher);
                    let hash = hasher.finish();
                    let mut state = self.state.lock().await;
                    let entry = state
                        .pane_hashes
                        .entry(agent.id.clone())
                        .or_insert((hash, now));
                    if entry.0 != hash {
                        *entry = (hash, now);
                    }
                    if entry.1 > last_observed {
                        last_observed = entry.1;
                    }
                }
            }

            if now - last_observed > stale_after {
                let mut state = self.state.lock().await;
                let already = state
                    .escalations
                    .iter()
                    .any(|e| !e.resolved && e.agent_id.as_deref() == Some(&agent.id));
                if already {
                    continue;
                }
                let reason = format!(
                    "agent {} silent for {}s (status {})",
                    agent.id,
                    (now - last_observed).num_seconds(),
                    agent.status
                );
                state.escalations.push(Escalation {
                    id: format!("esc-{}", uuid::Uuid::new_v4()),
                    kind: "stale_agent".to_string(),
                    task_id: None,
                    agent_id: Some(agent.id.clone()),
                    reason: reason.clone(),
                    plan: None,
                    created_at: now,
                    resolved: false,
                    response: None,
                    notified: false,
                });
                drop(state);
                warn!("{reason}");
                self.store
                    .add_alert(
                        Alert::new("stale_agent", AlertSeverity::Warning, &reason)
                            .for_agent(&agent.id),
                    )
                    .await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Escalation processing
    // -----------------------------------------------------------------------

    async fn process_escalations(&self) {
        let pending: Vec<Escalation> = {
            let mut state = self.state.lock().await;
            let pending = state
                .escalations
                .iter_mut()
                .filter(|e| !e.resolved && !e.notified)
                .map(|e| {
                    e.notified = true;
                    e.clone()
                })
                .collect();
            pending
        };
        for escalation in &pending {
            self.notifier.notify(escalation).await;
        }
    }

    pub async fn escalations(&self, include_resolved: bool) -> Vec<Escalation> {
        let state = self.state.lock().await;
        state
            .escalations
            .iter()
            .filter(|e| include_resolved || !e.resolved)
            .cloned()
            .collect()
    }

    /// Human verdict on an escalation.
    pub async fn respond_escalation(
        self: &Arc<Self>,
        id: &str,
        action: EscalationAction,
        response: Option<&str>,
    ) -> Result<Escalation> {
        let (escalation, task) = {
            let mut state = self.state.lock().await;
            let escalation = state
                .escalations
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| Error::not_found(format!("escalation: {id}")))?;
            if escalation.resolved {
                return Err(Error::conflict(format!("escalation already resolved: {id}")));
            }
            escalation.resolved = true;
            escalation.response = response.map(String::from);
            let escalation = escalation.clone();
            let task = escalation
                .task_id
                .as_ref()
                .and_then(|tid| state.tasks.get(tid).cloned());
            (escalation, task)
        };

        match action {
            EscalationAction::Approve => {
                if let Some(plan) = &escalation.plan {
                    let project_path = task.as_ref().and_then(|t| t.project_path.clone());
                    let dispatch = self
                        .dispatcher
                        .execute_plan(plan, project_path.as_deref(), true)
                        .await?;
                    let mut state = self.state.lock().await;
                    if let Some(task) = &task {
                        state.task_dispatches.insert(task.id.clone(), dispatch.id);
                        if let Some(t) = state.tasks.get_mut(&task.id) {
                            t.status = TaskStatus::Executing;
                        }
                    }
                }
            }
            EscalationAction::Reject => {
                if let Some(task) = &task {
                    let mut state = self.state.lock().await;
                    if let Some(t) = state.tasks.get_mut(&task.id) {
                        t.status = TaskStatus::Failed;
                    }
                    drop(state);
                    self.store.mark_task_completed(&task.id).await;
                }
            }
            EscalationAction::Modify => {
                // Human takes over; the task stays escalated with their notes.
            }
        }

        self.store
            .append_activity("captain", "escalation_resolved", &format!("{id}: {action:?}"))
            .await;
        self.store.record_human_checkin().await;
        Ok(escalation)
    }

    /// The dispatcher behind this captain (dispatch status/abort APIs).
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn status(&self) -> CaptainStatus {
        let state = self.state.lock().await;
        CaptainStatus {
            running: state.running,
            cycles: state.cycles,
            last_cycle_at: state.last_cycle_at,
            queued_tasks: state
                .tasks
                .values()
                .filter(|t| !t.status.is_terminal())
                .count(),
            executing_tasks: state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Executing)
                .count(),
            pending_escalations: state.escalations.iter().filter(|e| !e.resolved).count(),
        }
    }
}

/// Minimal one-agent plan for tasks that skip recon.
fn direct_plan(task: &Mission) -> ActionPlan {
    let agent_type = match task.task_type {
        TaskType::Implementation => "coder",
        TaskType::Testing => "tester",
        TaskType::Analysis => "reviewer",
        TaskType::Planning => "OpusGreen",
        TaskType::Recon => "SNTGreen",
    };
    let plan_id = format!("plan-{}", uuid::Uuid::new_v4());
    ActionPlan {
        id: plan_id,
        report_id: task.id.clone(),
        mode: OperationalMode::Dispatch,
        priority: PlanPriority::Medium,
        actions: Vec::new(),
        estimated_agents: 1,
        estimated_hours: 1.0,
        requires_human: task.requires_human,
        escalation_reason: task
            .requires_human
            .then(|| "task flagged requires_human".to_string()),
        recommendations: vec![AgentRecommendation {
            agent_type: agent_type.to_string(),
            priority: 1,
            task: format!("{}: {}", task.title, task.description),
            rationale: Some(format!("direct {} task", task.task_type)),
            finding_ids: Vec::new(),
        }],
        created_at: Utc::now(),
    }
}
