//! Dispatcher — executes action plans.
//!
//! `execute_plan` returns immediately with a spawning dispatch; a background
//! worker walks the recommendations in priority order with the mandatory
//! inter-spawn gap. Abort cancels the dispatch-scoped token and best-effort
//! stops anything already running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flotilla_core::{
    ActionPlan, Dispatch, DispatchStatus, Error, Result, SpawnStatus, SpawnedAgent,
};
use flotilla_spawn::Spawner;
use flotilla_state::StateStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Gap between consecutive spawns within one dispatch.
    pub inter_spawn_delay: Duration,
    /// Wall-clock bound for the whole spawn phase of a dispatch.
    pub batch_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            inter_spawn_delay: Duration::from_secs(2),
            batch_timeout: Duration::from_secs(30 * 60),
        }
    }
}

struct DispatchEntry {
    dispatch: Dispatch,
    cancel: CancellationToken,
}

pub struct Dispatcher {
    store: Arc<StateStore>,
    spawner: Arc<Spawner>,
    config: DispatcherConfig,
    dispatches: Mutex<HashMap<String, DispatchEntry>>,
}

impl Dispatcher {
    pub fn new(store: Arc<StateStore>, spawner: Arc<Spawner>, config: DispatcherConfig) -> Self {
        Self {
            store,
            spawner,
            config,
            dispatches: Mutex::new(HashMap::new()),
        }
    }

    /// Start executing a plan. Returns at once with `status=spawning`.
    /// Plans marked `requires_human` are refused unless `force` (an approved
    /// escalation) overrides.
    pub async fn execute_plan(
        self: &Arc<Self>,
        plan: &ActionPlan,
        project_path: Option<&str>,
        force: bool,
    ) -> Result<Dispatch> {
        if plan.requires_human && !force {
            return Err(Error::PreconditionFailed(format!(
                "plan {} requires human approval: {}",
                plan.id,
                plan.escalation_reason.as_deref().unwrap_or("unspecified")
            )));
        }

        let dispatch = Dispatch {
            id: format!("disp-{}", uuid::Uuid::new_v4()),
            plan_id: plan.id.clone(),
            mode: plan.mode,
            agents: Vec::new(),
            started_at: Utc::now(),
            status: DispatchStatus::Spawning,
        };
        let cancel = CancellationToken::new();
        self.dispatches.lock().await.insert(
            dispatch.id.clone(),
            DispatchEntry {
                dispatch: dispatch.clone(),
                cancel: cancel.clone(),
            },
        );

        let mut recommendations = plan.recommendations.clone();
        recommendations.sort_by_key(|r| r.priority);

        let dispatcher = self.clone();
        let dispatch_id = dispatch.id.clone();
        let project_path = project_path.map(String::from);
        tokio::spawn(async move {
            let work = dispatcher.spawn_all(&dispatch_id, recommendations, project_path.as_deref(), &cancel);
            match tokio::time::timeout(dispatcher.config.batch_timeout, work).await {
                Ok(()) => {}
                Err(_) => {
                    warn!("dispatch {dispatch_id} spawn phase timed out");
                    dispatcher
                        .set_status(&dispatch_id, DispatchStatus::Failed)
                        .await;
                }
            }
        });

        Ok(dispatch)
    }

    async fn spawn_all(
        self: &Arc<Self>,
        dispatch_id: &str,
        recommendations: Vec<flotilla_core::AgentRecommendation>,
        project_path: Option<&str>,
        cancel: &CancellationToken,
    ) {
        let total = recommendations.len();
        for (i, rec) in recommendations.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return;
            }
            let prompt = kickoff_prompt(&rec);
            let spawned = match self.spawner.spawn_agent(&rec.agent_type, &prompt, project_path).await {
                Ok(handle) => {
                    info!("dispatch {dispatch_id}: spawned {} for '{}'", handle.agent_id, rec.task);
                    SpawnedAgent {
                        agent_id: Some(handle.agent_id),
                        config_name: rec.agent_type.clone(),
                        status: SpawnStatus::Running,
                        error: None,
                        spawned_at: Utc::now(),
                    }
                }
                Err(e) => {
                    warn!("dispatch {dispatch_id}: spawn failed for {}: {e}", rec.agent_type);
                    self.store
                        .append_activity("captain", "spawn_failed", &format!("{}: {e}", rec.agent_type))
                        .await;
                    SpawnedAgent {
                        agent_id: None,
                        config_name: rec.agent_type.clone(),
                        status: SpawnStatus::Failed,
                        error: Some(e.to_string()),
                        spawned_at: Utc::now(),
                    }
                }
            };

            {
                let mut dispatches = self.dispatches.lock().await;
                if let Some(entry) = dispatches.get_mut(dispatch_id) {
                    entry.dispatch.agents.push(spawned);
                }
            }

            let last = i + 1 == total;
            if !last {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.inter_spawn_delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }
        self.set_running_if_spawning(dispatch_id).await;
    }

    async fn set_running_if_spawning(&self, dispatch_id: &str) {
        let mut dispatches = self.dispatches.lock().await;
        if let Some(entry) = dispatches.get_mut(dispatch_id) {
            if entry.dispatch.status == DispatchStatus::Spawning {
                entry.dispatch.status = DispatchStatus::Running;
            }
        }
    }

    async fn set_status(&self, dispatch_id: &str, status: DispatchStatus) {
        let mut dispatches = self.dispatches.lock().await;
        if let Some(entry) = dispatches.get_mut(dispatch_id) {
            entry.dispatch.status = status;
        }
    }

    /// Current dispatch state with the aggregate status freshened from the
    /// per-agent sub-statuses.
    pub async fn get_dispatch(&self, dispatch_id: &str) -> Option<Dispatch> {
        let mut dispatches = self.dispatches.lock().await;
        let entry = dispatches.get_mut(dispatch_id)?;
        refresh_aggregate(&mut entry.dispatch);
        Some(entry.dispatch.clone())
    }

    pub async fn list_dispatches(&self, filter: Option<DispatchStatus>) -> Vec<Dispatch> {
        let mut dispatches = self.dispatches.lock().await;
        let mut out: Vec<Dispatch> = dispatches
            .values_mut()
            .map(|e| {
                refresh_aggregate(&mut e.dispatch);
                e.dispatch.clone()
            })
            .filter(|d| filter.map(|f| d.status == f).unwrap_or(true))
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    /// Cancel the dispatch and best-effort stop every running agent.
    pub async fn abort_dispatch(&self, dispatch_id: &str) -> Result<()> {
        let (cancel, running) = {
            let dispatches = self.dispatches.lock().await;
            let entry = dispatches
                .get(dispatch_id)
                .ok_or_else(|| Error::not_found(format!("dispatch: {dispatch_id}")))?;
            let running: Vec<String> = entry
                .dispatch
                .agents
                .iter()
                .filter(|a| a.status == SpawnStatus::Running)
                .filter_map(|a| a.agent_id.clone())
                .collect();
            (entry.cancel.clone(), running)
        };
        cancel.cancel();

        for agent_id in running {
            if let Err(e) = self.spawner.stop_agent(&agent_id, "dispatch aborted").await {
                warn!("abort {dispatch_id}: stopping {agent_id}: {e}");
            }
        }

        let mut dispatches = self.dispatches.lock().await;
        if let Some(entry) = dispatches.get_mut(dispatch_id) {
            for agent in &mut entry.dispatch.agents {
                if agent.status == SpawnStatus::Running {
                    agent.status = SpawnStatus::Stopped;
                }
            }
            entry.dispatch.status = DispatchStatus::Aborted;
        }
        self.store
            .append_activity("captain", "dispatch_aborted", dispatch_id)
            .await;
        Ok(())
    }

    /// Record a terminal sub-status for an agent (finished, crashed, or lost).
    pub async fn note_agent_terminal(&self, agent_id: &str, status: SpawnStatus) {
        let mut dispatches = self.dispatches.lock().await;
        for entry in dispatches.values_mut() {
            for agent in &mut entry.dispatch.agents {
                if agent.agent_id.as_deref() == Some(agent_id)
                    && agent.status == SpawnStatus::Running
                {
                    agent.status = status;
                }
            }
        }
    }
}

/// Recompute the aggregate from sub-statuses; terminal aggregates stick.
fn refresh_aggregate(dispatch: &mut Dispatch) {
    if matches!(
        dispatch.status,
        DispatchStatus::Aborted | DispatchStatus::Cancelled | DispatchStatus::Spawning
    ) {
        return;
    }
    let counts = dispatch.counts();
    if counts.running > 0 || counts.pending > 0 {
        dispatch.status = DispatchStatus::Running;
    } else if counts.completed > 0 && counts.failed == 0 {
        dispatch.status = DispatchStatus::Completed;
    } else if counts.failed > 0 && counts.completed == 0 && counts.stopped == 0 {
        dispatch.status = DispatchStatus::Failed;
    } else {
        dispatch.status = DispatchStatus::Completed;
    }
}

fn kickoff_prompt(rec: &flotilla_core::AgentRecommendation) -> String {
    let mut prompt = format!(
        "You are agent {{agent_id}}. Connect to the tool server using your \
         transport config and call register_agent first. Task: {}.",
        rec.task
    );
    if let Some(rationale) = &rec.rationale {
        prompt.push_str(&format!(" Rationale: {rationale}."));
    }
    if !rec.finding_ids.is_empty() {
        prompt.push_str(&format!(" Related findings: {}.", rec.finding_ids.join(", ")));
    }
    prompt.push_str(" Report status via report_status and request_stop_approval when done.");
    prompt
}
