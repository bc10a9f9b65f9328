//! The state store — single source of truth for mutable runtime state.
//!
//! All writes take the one exclusive lock and nudge the persister; reads
//! clone a consistent snapshot and never touch disk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flotilla_core::{
    ActivityLogEntry, Agent, AgentMetrics, AgentStatus, Alert, ContextEntry, Error,
    HumanInputRequest, MetricsSnapshot, Result, StopApprovalRequest, Thresholds,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

pub const ACTIVITY_LOG_CAP: usize = 500;
pub const METRICS_HISTORY_CAP: usize = 1000;

/// Everything the coordinator persists, as one serializable value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub agents: HashMap<String, Agent>,
    #[serde(default)]
    pub metrics: HashMap<String, AgentMetrics>,
    #[serde(default)]
    pub metrics_history: VecDeque<MetricsSnapshot>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub human_inputs: Vec<HumanInputRequest>,
    #[serde(default)]
    pub stop_approvals: Vec<StopApprovalRequest>,
    #[serde(default)]
    pub activity_log: VecDeque<ActivityLogEntry>,
    #[serde(default)]
    pub activity_seq: u64,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub context: HashMap<String, ContextEntry>,
    /// Next agent number per role prefix, e.g. "team-sntgreen" -> 3.
    #[serde(default)]
    pub agent_counters: HashMap<String, u32>,
    /// Mission IDs that reached a terminal state; never re-imported.
    #[serde(default)]
    pub completed_tasks: HashSet<String>,
    #[serde(default)]
    pub supervisor_connected: bool,
    #[serde(default)]
    pub last_human_checkin: Option<DateTime<Utc>>,
}

pub struct StateStore {
    inner: Mutex<StoreSnapshot>,
    path: PathBuf,
    dirty: Notify,
    /// Number of completed snapshot writes; observable for tests and /api/stats.
    writes: AtomicU64,
}

impl StateStore {
    /// Load the last snapshot from `path`, or start from defaults.
    pub fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let snapshot = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(s) => s,
                Err(e) => {
                    warn!("state snapshot unreadable, starting fresh: {e}");
                    StoreSnapshot::default()
                }
            },
            Err(_) => StoreSnapshot::default(),
        };
        Arc::new(Self {
            inner: Mutex::new(snapshot),
            path,
            dirty: Notify::new(),
            writes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dirty(&self) -> &Notify {
        &self.dirty
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Consistent read of the full state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.lock().await.clone()
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub async fn add_agent(&self, agent: Agent) -> Result<()> {
        let mut s = self.inner.lock().await;
        if s.agents.contains_key(&agent.id) {
            return Err(Error::conflict(format!("agent already registered: {}", agent.id)));
        }
        s.metrics
            .entry(agent.id.clone())
            .or_insert_with(|| AgentMetrics::new(&agent.id));
        s.agents.insert(agent.id.clone(), agent);
        drop(s);
        self.mark_dirty();
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> Option<Agent> {
        self.inner.lock().await.agents.get(id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.inner.lock().await.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Apply a mutation to one agent. `NotFound` if absent.
    pub async fn update_agent<F>(&self, id: &str, f: F) -> Result<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let mut s = self.inner.lock().await;
        let agent = s
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("agent: {id}")))?;
        f(agent);
        let out = agent.clone();
        drop(s);
        self.mark_dirty();
        Ok(out)
    }

    pub async fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<Agent> {
        self.update_agent(id, |a| {
            a.status = status;
            a.last_seen = Utc::now();
        })
        .await
    }

    pub async fn touch_agent(&self, id: &str) -> Result<()> {
        self.update_agent(id, |a| a.last_seen = Utc::now()).await.map(|_| ())
    }

    pub async fn remove_agent(&self, id: &str) -> Option<Agent> {
        let mut s = self.inner.lock().await;
        let removed = s.agents.remove(id);
        drop(s);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    /// Allocate the next number for a role prefix. Strictly increasing per
    /// prefix within and across process lifetimes (the counter persists).
    pub async fn next_agent_number(&self, prefix: &str) -> u32 {
        let mut s = self.inner.lock().await;
        let counter = s.agent_counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        let n = *counter;
        drop(s);
        self.mark_dirty();
        n
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    /// Mutate an agent's metrics and append a snapshot to the bounded history.
    pub async fn update_metrics<F>(&self, agent_id: &str, f: F) -> Result<AgentMetrics>
    where
        F: FnOnce(&mut AgentMetrics),
    {
        let mut s = self.inner.lock().await;
        if !s.agents.contains_key(agent_id) {
            return Err(Error::not_found(format!("agent: {agent_id}")));
        }
        let metrics = s
            .metrics
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentMetrics::new(agent_id));
        f(metrics);
        let out = metrics.clone();
        s.metrics_history.push_back(MetricsSnapshot {
            taken_at: Utc::now(),
            metrics: out.clone(),
        });
        while s.metrics_history.len() > METRICS_HISTORY_CAP {
            s.metrics_history.pop_front();
        }
        drop(s);
        self.mark_dirty();
        Ok(out)
    }

    pub async fn get_metrics(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.inner.lock().await.metrics.get(agent_id).cloned()
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    pub async fn add_alert(&self, alert: Alert) -> String {
        let id = alert.id.clone();
        let mut s = self.inner.lock().await;
        s.alerts.push(alert);
        drop(s);
        self.mark_dirty();
        id
    }

    pub async fn ack_alert(&self, id: &str) -> Result<()> {
        let mut s = self.inner.lock().await;
        let alert = s
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::not_found(format!("alert: {id}")))?;
        alert.acknowledged = true;
        drop(s);
        self.mark_dirty();
        Ok(())
    }

    /// Drop all acknowledged alerts. Returns how many were removed.
    pub async fn clear_alerts(&self) -> usize {
        let mut s = self.inner.lock().await;
        let before = s.alerts.len();
        s.alerts.retain(|a| !a.acknowledged);
        let removed = before - s.alerts.len();
        drop(s);
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Human input
    // -----------------------------------------------------------------------

    pub async fn add_human_input(&self, request: HumanInputRequest) -> String {
        let id = request.id.clone();
        let mut s = self.inner.lock().await;
        s.human_inputs.push(request);
        drop(s);
        self.mark_dirty();
        id
    }

    pub async fn answer_human_input(&self, id: &str, answer: &str) -> Result<HumanInputRequest> {
        let mut s = self.inner.lock().await;
        let req = s
            .human_inputs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found(format!("human input request: {id}")))?;
        if req.answered {
            return Err(Error::conflict(format!("request already answered: {id}")));
        }
        req.answered = true;
        req.answer = Some(answer.to_string());
        let out = req.clone();
        drop(s);
        self.mark_dirty();
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Stop approvals
    // -----------------------------------------------------------------------

    pub async fn add_stop_approval(&self, request: StopApprovalRequest) -> String {
        let id = request.id.clone();
        let mut s = self.inner.lock().await;
        s.stop_approvals.push(request);
        drop(s);
        self.mark_dirty();
        id
    }

    /// Review a stop approval. Transitions pending → reviewed exactly once;
    /// a second call is a `Conflict`.
    pub async fn respond_stop_approval(
        &self,
        id: &str,
        approved: bool,
        response: Option<&str>,
        reviewer: &str,
    ) -> Result<StopApprovalRequest> {
        let mut s = self.inner.lock().await;
        let req = s
            .stop_approvals
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found(format!("stop approval: {id}")))?;
        if req.reviewed {
            return Err(Error::conflict(format!("stop approval already reviewed: {id}")));
        }
        req.reviewed = true;
        req.approved = approved;
        req.response = response.map(String::from);
        req.reviewer = Some(reviewer.to_string());
        let out = req.clone();
        drop(s);
        self.mark_dirty();
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Activity log
    // -----------------------------------------------------------------------

    pub async fn append_activity(&self, agent_id: &str, action: &str, details: &str) -> u64 {
        let mut s = self.inner.lock().await;
        s.activity_seq += 1;
        let id = s.activity_seq;
        s.activity_log.push_back(ActivityLogEntry {
            id,
            agent_id: agent_id.to_string(),
            action: action.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
        });
        while s.activity_log.len() > ACTIVITY_LOG_CAP {
            s.activity_log.pop_front();
        }
        drop(s);
        self.mark_dirty();
        id
    }

    // -----------------------------------------------------------------------
    // Thresholds, context, misc
    // -----------------------------------------------------------------------

    pub async fn thresholds(&self) -> Thresholds {
        self.inner.lock().await.thresholds.clone()
    }

    pub async fn set_thresholds(&self, thresholds: Thresholds) {
        self.inner.lock().await.thresholds = thresholds;
        self.mark_dirty();
    }

    pub async fn save_context(&self, entry: ContextEntry) {
        let mut s = self.inner.lock().await;
        s.context.insert(entry.key.clone(), entry);
        drop(s);
        self.mark_dirty();
    }

    pub async fn get_context(&self, key: &str) -> Option<ContextEntry> {
        let s = self.inner.lock().await;
        s.context
            .get(key)
            .filter(|e| !e.is_expired(Utc::now()))
            .cloned()
    }

    /// All live (non-expired) context entries, highest priority first.
    pub async fn all_context(&self) -> Vec<ContextEntry> {
        let now = Utc::now();
        let s = self.inner.lock().await;
        let mut entries: Vec<ContextEntry> = s
            .context
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.key.cmp(&b.key)));
        entries
    }

    pub async fn set_supervisor_connected(&self, connected: bool) {
        self.inner.lock().await.supervisor_connected = connected;
        self.mark_dirty();
    }

    pub async fn record_human_checkin(&self) {
        self.inner.lock().await.last_human_checkin = Some(Utc::now());
        self.mark_dirty();
    }

    pub async fn mark_task_completed(&self, task_id: &str) {
        let mut s = self.inner.lock().await;
        s.completed_tasks.insert(task_id.to_string());
        drop(s);
        self.mark_dirty();
    }

    pub async fn is_task_completed(&self, task_id: &str) -> bool {
        self.inner.lock().await.completed_tasks.contains(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::AlertSeverity;

    fn store() -> Arc<StateStore> {
        let dir = tempfile::tempdir().unwrap();
        StateStore::load(dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn add_agent_rejects_duplicates() {
        let store = store();
        store.add_agent(Agent::new("a1", "SNTGreen", "SNTGreen")).await.unwrap();
        let err = store
            .add_agent(Agent::new("a1", "SNTGreen", "SNTGreen"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn activity_log_is_bounded() {
        let store = store();
        for i in 0..(ACTIVITY_LOG_CAP + 50) {
            store.append_activity("a1", "tick", &format!("{i}")).await;
        }
        let snap = store.snapshot().await;
        assert_eq!(snap.activity_log.len(), ACTIVITY_LOG_CAP);
        // Oldest entries were discarded first.
        assert_eq!(snap.activity_log.front().unwrap().details, "50");
    }

    #[tokio::test]
    async fn metrics_history_is_bounded() {
        let store = store();
        store.add_agent(Agent::new("a1", "SNTGreen", "SNTGreen")).await.unwrap();
        for _ in 0..(METRICS_HISTORY_CAP + 10) {
            store
                .update_metrics("a1", |m| m.tokens_used += 1)
                .await
                .unwrap();
        }
        let snap = store.snapshot().await;
        assert_eq!(snap.metrics_history.len(), METRICS_HISTORY_CAP);
        assert_eq!(snap.metrics["a1"].tokens_used, (METRICS_HISTORY_CAP + 10) as u64);
    }

    #[tokio::test]
    async fn stop_approval_reviewed_exactly_once() {
        let store = store();
        let id = store
            .add_stop_approval(StopApprovalRequest::new("a1", flotilla_core::StopReason::Blocked))
            .await;
        let first = store
            .respond_stop_approval(&id, true, Some("go ahead"), "operator")
            .await
            .unwrap();
        assert!(first.reviewed);
        assert_eq!(first.response.as_deref(), Some("go ahead"));

        let second = store
            .respond_stop_approval(&id, false, None, "operator")
            .await;
        assert!(matches!(second, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn agent_numbers_are_distinct_and_increasing_under_contention() {
        let store = store();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.next_agent_number("team-sntgreen").await
            }));
        }
        let mut numbers = Vec::new();
        for h in handles {
            numbers.push(h.await.unwrap());
        }
        numbers.sort_unstable();
        let expected: Vec<u32> = (1..=32).collect();
        assert_eq!(numbers, expected);
        // A different prefix starts at 1 again.
        assert_eq!(store.next_agent_number("team-opusred").await, 1);
    }

    #[tokio::test]
    async fn context_expiry_filters_reads() {
        let store = store();
        store
            .save_context(ContextEntry {
                key: "stale".into(),
                value: "v".into(),
                priority: 5,
                expires_at: Some(Utc::now() - chrono::Duration::seconds(10)),
            })
            .await;
        store
            .save_context(ContextEntry {
                key: "live".into(),
                value: "v".into(),
                priority: 1,
                expires_at: None,
            })
            .await;
        assert!(store.get_context("stale").await.is_none());
        let all = store.all_context().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "live");
    }

    #[tokio::test]
    async fn alerts_ack_and_clear() {
        let store = store();
        let id = store
            .add_alert(Alert::new("stale_agent", AlertSeverity::Warning, "a1 stale"))
            .await;
        store.add_alert(Alert::new("other", AlertSeverity::Info, "x")).await;
        store.ack_alert(&id).await.unwrap();
        assert_eq!(store.clear_alerts().await, 1);
        let snap = store.snapshot().await;
        assert_eq!(snap.alerts.len(), 1);
        assert_eq!(snap.alerts[0].kind, "other");
    }
}
