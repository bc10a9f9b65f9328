//! Supervisor state machine types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorStatus {
    Starting,
    Running,
    Crashed,
    Restarting,
    Stopped,
    Disabled,
}

impl std::fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
            Self::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Crashes tolerated inside one window before auto-respawn halts.
    pub max_respawns: u32,
    /// Rolling crash-count window.
    pub crash_window: Duration,
    /// Pause before a respawn after a crash.
    pub respawn_delay: Duration,
    /// Exit 0 faster than this is the launcher exiting, not the captain.
    pub launcher_exit_threshold: Duration,
    /// How often the pane listing is polled when no child handle exists.
    pub poll_interval: Duration,
    /// Percent of the window the captain pane takes when splitting.
    pub split_percent: u8,
    /// Launch command for the captain CLI. `{config}` expands to the
    /// captain's transport config path.
    pub command: String,
    /// Seed prompt typed into the captain pane after launch.
    pub seed_prompt: String,
    /// Where the captain's transport config is written.
    pub transport_config_dir: std::path::PathBuf,
    /// Tool server base URL, for the transport config.
    pub server_url: String,
    /// Pane to split when the coordinator runs inside the multiplexer.
    pub home_pane: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_respawns: 3,
            crash_window: Duration::from_secs(60),
            respawn_delay: Duration::from_secs(2),
            launcher_exit_threshold: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            split_percent: 95,
            command: "claude --dangerously-skip-permissions --mcp-config {config}".to_string(),
            seed_prompt: "You are the captain. Register with register_agent, then survey \
                          your crew with list_panes and wait for orders."
                .to_string(),
            transport_config_dir: std::path::PathBuf::from("./flotilla-data/agents"),
            server_url: "http://127.0.0.1:18901".to_string(),
            home_pane: None,
        }
    }
}

/// Observable supervisor state for the status API.
#[derive(Clone, Debug, Serialize)]
pub struct SupervisorState {
    pub status: SupervisorStatus,
    #[serde(default)]
    pub pane: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub crash_count: u32,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
}
