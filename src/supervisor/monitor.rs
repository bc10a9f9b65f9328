//! Captain lifecycle: spawn in a pane, watch for exit, respawn with
//! crash-loop protection.
//!
//! When the coordinator runs inside the multiplexer there is no child
//! handle for the captain; the monitor polls the pane listing and treats
//! pane disappearance as termination.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flotilla_core::{AccessLevel, Agent, Alert, AlertSeverity, Error, Result};
use flotilla_panes::{PaneController, SplitDirection};
use flotilla_spawn::TransportConfig;
use flotilla_state::StateStore;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::{SupervisorConfig, SupervisorState, SupervisorStatus};

pub const CAPTAIN_AGENT_ID: &str = "captain";

struct Inner {
    status: SupervisorStatus,
    pane: Option<String>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    started_at_utc: Option<chrono::DateTime<Utc>>,
    crash_count: u32,
    window_start: Option<Instant>,
    stop_requested: bool,
    last_exit_code: Option<i32>,
}

pub struct CaptainSupervisor {
    panes: Arc<dyn PaneController>,
    store: Arc<StateStore>,
    config: SupervisorConfig,
    inner: Mutex<Inner>,
    pane_tx: watch::Sender<Option<String>>,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl CaptainSupervisor {
    /// Returns the supervisor and the shutdown receiver, which fires exactly
    /// once when the captain exits cleanly.
    pub fn new(
        panes: Arc<dyn PaneController>,
        store: Arc<StateStore>,
        config: SupervisorConfig,
        pane_tx: watch::Sender<Option<String>>,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let supervisor = Arc::new(Self {
            panes,
            store,
            config,
            inner: Mutex::new(Inner {
                status: SupervisorStatus::Starting,
                pane: None,
                pid: None,
                started_at: None,
                started_at_utc: None,
                crash_count: 0,
                window_start: None,
                stop_requested: false,
                last_exit_code: None,
            }),
            pane_tx,
            shutdown_tx: std::sync::Mutex::new(Some(shutdown_tx)),
        });
        (supervisor, shutdown_rx)
    }

    /// Launch the captain and start watching it.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.spawn_captain().await?;
        let this = self.clone();
        tokio::spawn(async move { this.monitor(cancel).await });
        Ok(())
    }

    async fn spawn_captain(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.status = SupervisorStatus::Starting;
            inner.stop_requested = false;
        }

        // Transport config lands before the captain can launch.
        let transport = TransportConfig {
            server_url: self.config.server_url.clone(),
            agent_id: CAPTAIN_AGENT_ID.to_string(),
            access_level: AccessLevel::Admin,
            project_path: None,
        };
        tokio::fs::create_dir_all(&self.config.transport_config_dir).await?;
        let config_path = self
            .config
            .transport_config_dir
            .join(format!("{CAPTAIN_AGENT_ID}.json"));
        tokio::fs::write(&config_path, serde_json::to_string_pretty(&transport)?).await?;

        let command = self
            .config
            .command
            .replace("{config}", &config_path.display().to_string());

        // The captain is an agent in the store like any other.
        if self.store.get_agent(CAPTAIN_AGENT_ID).await.is_none() {
            let mut agent = Agent::new(CAPTAIN_AGENT_ID, "Captain", "Captain");
            agent.color = Some("gold".to_string());
            self.store.add_agent(agent).await.ok();
        }

        let pane = match &self.config.home_pane {
            Some(home) => {
                let pane = self
                    .panes
                    .split_pane(home, SplitDirection::Above, self.config.split_percent, None)
                    .await
                    .map_err(|e| Error::spawn_failed(format!("captain pane split: {e}")))?;
                self.panes
                    .send_text(&pane, &command)
                    .await
                    .map_err(|e| Error::spawn_failed(format!("captain launch: {e}")))?;
                pane
            }
            None => self
                .panes
                .new_window(CAPTAIN_AGENT_ID, &command, None)
                .await
                .map_err(|e| Error::spawn_failed(format!("captain window: {e}")))?,
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        if let Err(e) = self.panes.send_text(&pane, &self.config.seed_prompt).await {
            warn!("captain seed prompt not delivered: {e}");
        }

        self.store
            .update_agent(CAPTAIN_AGENT_ID, |a| {
                a.pane = Some(pane.clone());
                a.status = flotilla_core::AgentStatus::Spawning;
                a.last_seen = Utc::now();
            })
            .await
            .ok();

        {
            let mut inner = self.inner.lock().await;
            inner.pane = Some(pane.clone());
            // Split mode has no direct child handle: PID stays unknown and
            // liveness comes from the pane listing.
            inner.pid = None;
            inner.started_at = Some(Instant::now());
            inner.started_at_utc = Some(Utc::now());
            inner.status = SupervisorStatus::Running;
        }
        // Subscribers (the spawner, the dashboard) learn the pane exactly once
        // per spawn.
        let _ = self.pane_tx.send(Some(pane.clone()));
        self.store
            .set_supervisor_connected(true)
            .await;
        info!("captain running in pane {pane}");
        Ok(())
    }

    /// Poll the pane listing; pane disappearance is termination.
    async fn monitor(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let (status, pane, started_at, stop_requested) = {
                let inner = self.inner.lock().await;
                (
                    inner.status,
                    inner.pane.clone(),
                    inner.started_at,
                    inner.stop_requested,
                )
            };
            if status != SupervisorStatus::Running {
                if matches!(status, SupervisorStatus::Stopped | SupervisorStatus::Disabled) {
                    return;
                }
                continue;
            }
            let Some(pane) = pane else { continue };

            match self.panes.list_panes().await {
                Ok(infos) => {
                    if infos.iter().any(|p| p.id == pane) {
                        continue;
                    }
                    let runtime = started_at.map(|t| t.elapsed()).unwrap_or_default();
                    // No child handle: a requested stop counts as clean exit,
                    // anything else as a crash.
                    let code = if stop_requested { Some(0) } else { None };
                    self.handle_exit(code, runtime).await;
                }
                Err(e) => warn!("captain monitor pane listing failed: {e}"),
            }
        }
    }

    /// Drive the exit state machine. Public so the exit observation can come
    /// from the pane poll, a child waiter, or a test.
    pub async fn handle_exit(self: &Arc<Self>, exit_code: Option<i32>, runtime: Duration) {
        {
            let mut inner = self.inner.lock().await;
            inner.last_exit_code = exit_code;
        }

        match exit_code {
            Some(0) if runtime < self.config.launcher_exit_threshold => {
                // Launcher exit, not captain exit.
                info!("ignoring exit 0 after {runtime:?}: launcher handoff");
            }
            Some(0) => {
                info!("captain exited cleanly after {runtime:?}");
                let mut inner = self.inner.lock().await;
                inner.status = SupervisorStatus::Stopped;
                inner.pane = None;
                drop(inner);
                let _ = self.pane_tx.send(None);
                self.store.set_supervisor_connected(false).await;
                self.close_shutdown_channel();
            }
            _ => self.handle_crash(exit_code, runtime).await,
        }
    }

    async fn handle_crash(self: &Arc<Self>, exit_code: Option<i32>, runtime: Duration) {
        error!(
            "captain crashed (exit {:?}) after {runtime:?}",
            exit_code
        );
        self.store
            .add_alert(
                Alert::new("captain_crash", AlertSeverity::Critical, format!(
                    "captain exited with {exit_code:?} after {runtime:?}"
                ))
                .for_agent(CAPTAIN_AGENT_ID),
            )
            .await;
        self.store
            .append_activity(CAPTAIN_AGENT_ID, "crashed", &format!("{exit_code:?}"))
            .await;

        let exceeded = {
            let mut inner = self.inner.lock().await;
            inner.status = SupervisorStatus::Crashed;
            inner.pane = None;

            // Rolling window: expired windows reset the counter.
            let now = Instant::now();
            match inner.window_start {
                Some(start) if now.duration_since(start) <= self.config.crash_window => {}
                _ => {
                    inner.window_start = Some(now);
                    inner.crash_count = 0;
                }
            }
            inner.crash_count += 1;
            inner.crash_count > self.config.max_respawns
        };
        let _ = self.pane_tx.send(None);

        if exceeded {
            error!(
                "captain crash loop: more than {} crashes inside {:?}, disabling auto-respawn",
                self.config.max_respawns, self.config.crash_window
            );
            self.store
                .add_alert(Alert::new(
                    "crash_loop",
                    AlertSeverity::Critical,
                    "captain auto-respawn disabled; manual restart required",
                ))
                .await;
            let mut inner = self.inner.lock().await;
            inner.status = SupervisorStatus::Disabled;
            drop(inner);
            self.store.set_supervisor_connected(false).await;
            return;
        }

        {
            let mut inner = self.inner.lock().await;
            inner.status = SupervisorStatus::Restarting;
        }
        tokio::time::sleep(self.config.respawn_delay).await;
        if let Err(e) = self.spawn_captain().await {
            error!("captain respawn failed: {e}");
            // Count the failed respawn as another crash next time around.
            let mut inner = self.inner.lock().await;
            inner.status = SupervisorStatus::Crashed;
        }
    }

    /// Manual restart: resets the crash window and respawns.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        let pane = {
            let mut inner = self.inner.lock().await;
            inner.crash_count = 0;
            inner.window_start = None;
            inner.stop_requested = false;
            inner.pane.take()
        };
        if let Some(pane) = pane {
            let _ = self.panes.close_pane(&pane).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.spawn_captain().await
    }

    /// Ask the captain to go away and stop supervising it.
    pub async fn stop(self: &Arc<Self>) {
        let (pane, runtime) = {
            let mut inner = self.inner.lock().await;
            inner.stop_requested = true;
            (
                inner.pane.clone(),
                inner.started_at.map(|t| t.elapsed()).unwrap_or_default(),
            )
        };
        if let Some(pane) = pane {
            let _ = self.panes.close_pane(&pane).await;
        }
        self.handle_exit(Some(0), runtime.max(self.config.launcher_exit_threshold))
            .await;
    }

    fn close_shutdown_channel(&self) {
        if let Ok(mut guard) = self.shutdown_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }

    pub async fn state(&self) -> SupervisorState {
        let inner = self.inner.lock().await;
        SupervisorState {
            status: inner.status,
            pane: inner.pane.clone(),
            pid: inner.pid,
            started_at: inner.started_at_utc,
            crash_count: inner.crash_count,
            last_exit_code: inner.last_exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_panes::{HeadlessPanes, RpcGate};

    fn fast_config(dir: &std::path::Path) -> SupervisorConfig {
        SupervisorConfig {
            respawn_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            transport_config_dir: dir.join("agents"),
            home_pane: Some("%0".to_string()),
            ..SupervisorConfig::default()
        }
    }

    async fn fixture() -> (Arc<CaptainSupervisor>, Arc<StateStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"));
        let panes: Arc<dyn PaneController> = Arc::new(HeadlessPanes::new(Arc::new(RpcGate::new(
            Duration::from_millis(1),
        ))));
        let (pane_tx, _pane_rx) = watch::channel(None);
        let (supervisor, _shutdown_rx) =
            CaptainSupervisor::new(panes, store.clone(), fast_config(dir.path()), pane_tx);
        (supervisor, store, dir)
    }

    #[tokio::test]
    async fn spawn_publishes_pane_and_registers_captain() {
        let (supervisor, store, _dir) = fixture().await;
        supervisor.spawn_captain().await.unwrap();

        let state = supervisor.state().await;
        assert_eq!(state.status, SupervisorStatus::Running);
        assert!(state.pane.is_some());
        assert!(state.pid.is_none(), "split mode has no child handle");

        let captain = store.get_agent(CAPTAIN_AGENT_ID).await.unwrap();
        assert_eq!(captain.pane, state.pane);
    }

    #[tokio::test]
    async fn launcher_exit_is_ignored() {
        let (supervisor, _store, _dir) = fixture().await;
        supervisor.spawn_captain().await.unwrap();
        supervisor.handle_exit(Some(0), Duration::from_secs(1)).await;
        assert_eq!(supervisor.state().await.status, SupervisorStatus::Running);
    }

    #[tokio::test]
    async fn clean_exit_closes_shutdown_channel_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json"));
        let panes: Arc<dyn PaneController> = Arc::new(HeadlessPanes::new(Arc::new(RpcGate::new(
            Duration::from_millis(1),
        ))));
        let (pane_tx, _pane_rx) = watch::channel(None);
        let (supervisor, shutdown_rx) =
            CaptainSupervisor::new(panes, store, fast_config(dir.path()), pane_tx);

        supervisor.spawn_captain().await.unwrap();
        supervisor.handle_exit(Some(0), Duration::from_secs(60)).await;
        assert_eq!(supervisor.state().await.status, SupervisorStatus::Stopped);
        shutdown_rx.await.expect("shutdown channel fired");

        // A second clean exit must not panic on the spent channel.
        supervisor.handle_exit(Some(0), Duration::from_secs(60)).await;
    }

    #[tokio::test]
    async fn four_crashes_inside_the_window_disable_respawn() {
        let (supervisor, store, _dir) = fixture().await;
        supervisor.spawn_captain().await.unwrap();

        for _ in 0..3 {
            supervisor.handle_exit(Some(1), Duration::from_secs(10)).await;
            assert_eq!(
                supervisor.state().await.status,
                SupervisorStatus::Running,
                "respawn should keep the captain alive below the budget"
            );
        }
        supervisor.handle_exit(Some(1), Duration::from_secs(10)).await;

        let state = supervisor.state().await;
        assert_eq!(state.status, SupervisorStatus::Disabled);
        assert_eq!(state.crash_count, 4);

        let snap = store.snapshot().await;
        assert!(snap.alerts.iter().any(|a| a.kind == "crash_loop"));
    }

    #[tokio::test]
    async fn manual_restart_resets_the_crash_budget() {
        let (supervisor, _store, _dir) = fixture().await;
        supervisor.spawn_captain().await.unwrap();
        for _ in 0..4 {
            supervisor.handle_exit(Some(1), Duration::from_secs(10)).await;
        }
        assert_eq!(supervisor.state().await.status, SupervisorStatus::Disabled);

        supervisor.restart().await.unwrap();
        let state = supervisor.state().await;
        assert_eq!(state.status, SupervisorStatus::Running);
        assert_eq!(state.crash_count, 0);
    }
}
