//! Agent materialization.
//!
//! Order matters: the transport config lands on disk before the process
//! starts, and the agent enters the store before its launch command is sent,
//! so the first tool call can never hit an unknown agent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flotilla_core::{
    id_prefix_for, AccessLevel, Agent, AgentStatus, ConfigRegistry, Error, Result,
};
use flotilla_panes::{PaneController, SplitDirection};
use flotilla_state::StateStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::stop::StopSignaller;

/// Per-agent tool-transport configuration, written before launch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    pub server_url: String,
    pub agent_id: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub project_path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SpawnerConfig {
    /// Base URL agents use to reach the tool-call server.
    pub server_url: String,
    /// Directory for per-agent transport config files.
    pub transport_config_dir: PathBuf,
    /// Size (percent) of a freshly split agent pane.
    pub split_percent: u8,
    /// Delay between the launch command and the kickoff prompt.
    pub prompt_delay: Duration,
    /// Grace period before a stop request turns into a force kill.
    pub stop_deadline: Duration,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:18901".to_string(),
            transport_config_dir: PathBuf::from("./flotilla-data/agents"),
            split_percent: 30,
            prompt_delay: Duration::from_secs(2),
            stop_deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpawnHandle {
    pub agent_id: String,
    pub pane: String,
}

pub struct Spawner {
    store: Arc<StateStore>,
    panes: Arc<dyn PaneController>,
    registry: ConfigRegistry,
    config: SpawnerConfig,
    /// The captain's pane, once known. Agent panes split below it.
    captain_pane: watch::Receiver<Option<String>>,
    signaller: tokio::sync::Mutex<Option<Arc<dyn StopSignaller>>>,
}

impl Spawner {
    pub fn new(
        store: Arc<StateStore>,
        panes: Arc<dyn PaneController>,
        registry: ConfigRegistry,
        config: SpawnerConfig,
        captain_pane: watch::Receiver<Option<String>>,
    ) -> Self {
        Self {
            store,
            panes,
            registry,
            config,
            captain_pane,
            signaller: tokio::sync::Mutex::new(None),
        }
    }

    /// Wire the graceful-stop path once the tool-call server exists.
    pub async fn set_signaller(&self, signaller: Arc<dyn StopSignaller>) {
        *self.signaller.lock().await = Some(signaller);
    }

    /// `<slug(role)><NNN>` from the store's per-role counter.
    pub async fn generate_agent_id(&self, role: &str) -> String {
        let prefix = id_prefix_for(role);
        let n = self.store.next_agent_number(&prefix).await;
        format!("{prefix}{n:03}")
    }

    /// Spawn an agent for `config_name` with the given kickoff prompt. Any
    /// `{agent_id}` placeholder in the prompt is replaced with the allocated id.
    pub async fn spawn_agent(
        &self,
        config_name: &str,
        prompt: &str,
        project_path: Option<&str>,
    ) -> Result<SpawnHandle> {
        let cfg = self
            .registry
            .resolve(config_name)
            .ok_or_else(|| Error::spawn_failed(format!("no agent config resolves: {config_name}")))?
            .clone();

        let agent_id = self.generate_agent_id(&cfg.name).await;
        let prompt = prompt.replace("{agent_id}", &agent_id);

        // Transport config goes to disk before anything can launch.
        let transport = TransportConfig {
            server_url: self.config.server_url.clone(),
            agent_id: agent_id.clone(),
            access_level: cfg.access_level,
            project_path: project_path.map(String::from),
        };
        let config_path = self.write_transport_config(&transport).await?;

        // Pane first: splitting does not start the agent yet.
        let captain_pane = self.captain_pane.borrow().clone();
        let pane = match &captain_pane {
            Some(parent) => {
                self.panes
                    .split_pane(parent, SplitDirection::Below, self.config.split_percent, project_path)
                    .await
                    .map_err(|e| Error::spawn_failed(format!("pane split: {e}")))?
            }
            None => {
                let command = render_command(&cfg.command, &config_path);
                let pane = self
                    .panes
                    .new_window(&agent_id, &command, project_path)
                    .await
                    .map_err(|e| Error::spawn_failed(format!("new window: {e}")))?;
                pane
            }
        };

        // Register before the launch command lands.
        let mut agent = Agent::new(&agent_id, &cfg.name, &cfg.name);
        agent.color = cfg.color.clone();
        agent.pane = Some(pane.clone());
        if let Err(e) = self.store.add_agent(agent).await {
            let _ = self.panes.close_pane(&pane).await;
            return Err(Error::spawn_failed(format!("register: {e}")));
        }

        // Split mode still needs the launch command typed into the pane.
        if captain_pane.is_some() {
            let command = render_command(&cfg.command, &config_path);
            if let Err(e) = self.panes.send_text(&pane, &command).await {
                let _ = self.store.remove_agent(&agent_id).await;
                let _ = self.panes.close_pane(&pane).await;
                return Err(Error::spawn_failed(format!("launch command: {e}")));
            }
        }

        tokio::time::sleep(self.config.prompt_delay).await;
        if let Err(e) = self.panes.send_text(&pane, &prompt).await {
            warn!("kickoff prompt not delivered to {agent_id}: {e}");
        }

        self.store
            .append_activity(&agent_id, "spawned", &format!("config={} pane={pane}", cfg.name))
            .await;
        info!("spawned agent {agent_id} in pane {pane}");

        Ok(SpawnHandle { agent_id, pane })
    }

    async fn write_transport_config(&self, transport: &TransportConfig) -> Result<PathBuf> {
        let dir = &self.config.transport_config_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::spawn_failed(format!("config dir: {e}")))?;
        let path = dir.join(format!("{}.json", transport.agent_id));
        let json = serde_json::to_string_pretty(transport)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::spawn_failed(format!("transport config: {e}")))?;
        Ok(path)
    }

    /// Request a graceful stop; force-kill when the deadline passes without
    /// the agent reaching `stopped`.
    pub async fn stop_agent(self: &Arc<Self>, agent_id: &str, reason: &str) -> Result<()> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await
            .ok_or_else(|| Error::not_found(format!("agent: {agent_id}")))?;
        if matches!(agent.status, AgentStatus::Stopped | AgentStatus::Stopping) {
            return Err(Error::PreconditionFailed(format!(
                "agent already {}: {agent_id}",
                agent.status
            )));
        }

        self.store
            .update_agent(agent_id, |a| {
                a.status = AgentStatus::Stopping;
                a.shutdown_requested_at = Some(chrono::Utc::now());
            })
            .await?;

        let signalled = match self.signaller.lock().await.clone() {
            Some(s) => s.signal_shutdown(agent_id, reason).await,
            None => false,
        };
        if !signalled {
            warn!("no live session to signal for {agent_id}, deadline still applies");
        }
        self.store
            .append_activity(agent_id, "stop_requested", reason)
            .await;

        let spawner = self.clone();
        let agent_id = agent_id.to_string();
        let deadline = self.config.stop_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            match spawner.store.get_agent(&agent_id).await {
                Some(a) if a.status == AgentStatus::Stopping => {
                    info!("stop deadline passed for {agent_id}, force killing");
                    let _ = spawner.force_stop(&agent_id).await;
                }
                _ => {}
            }
        });
        Ok(())
    }

    /// Kill the pane and drop the agent from the store.
    pub async fn force_stop(&self, agent_id: &str) -> Result<()> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await
            .ok_or_else(|| Error::not_found(format!("agent: {agent_id}")))?;
        if let Some(pane) = &agent.pane {
            if let Err(e) = self.panes.close_pane(pane).await {
                warn!("closing pane {pane} for {agent_id}: {e}");
            }
        }
        self.store.set_agent_status(agent_id, AgentStatus::Stopped).await?;
        self.store.remove_agent(agent_id).await;
        self.store.append_activity(agent_id, "force_stopped", "").await;
        Ok(())
    }

    /// The agent acknowledged shutdown and exited on its own.
    pub async fn confirm_stopped(&self, agent_id: &str) -> Result<()> {
        let agent = self.store.set_agent_status(agent_id, AgentStatus::Stopped).await?;
        if let Some(pane) = &agent.pane {
            let _ = self.panes.close_pane(pane).await;
        }
        self.store.remove_agent(agent_id).await;
        self.store.append_activity(agent_id, "stopped", "").await;
        Ok(())
    }
}

/// Expand the launch template. `{config}` is the transport config path.
fn render_command(template: &str, config_path: &std::path::Path) -> String {
    template.replace("{config}", &config_path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_command_substitutes_config() {
        let cmd = render_command(
            "claude --mcp-config {config}",
            std::path::Path::new("/data/agents/team-sntgreen001.json"),
        );
        assert_eq!(cmd, "claude --mcp-config /data/agents/team-sntgreen001.json");
    }
}
