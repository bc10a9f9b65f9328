//! Coordinator config — serde structs for `<data-dir>/flotilla.json`
//!
//! Pure types and parsing only. The binaries decide where the file lives and
//! how overrides compose with CLI flags.

use crate::types::AccessLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One launchable agent role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Registry name, e.g. "SNTGreen", "OpusRed".
    pub name: String,
    /// Display color for the dashboard.
    #[serde(default)]
    pub color: Option<String>,
    /// Model tag used for cost estimation.
    #[serde(default)]
    pub model: Option<String>,
    /// Launch command template. `{config}` expands to the per-agent
    /// transport config path, `{prompt}` to the kickoff prompt file.
    pub command: String,
    #[serde(default)]
    pub access_level: AccessLevel,
}

impl AgentConfig {
    /// Stable agent-id prefix for this role: `team-` + lowercased name.
    pub fn id_prefix(&self) -> String {
        id_prefix_for(&self.name)
    }
}

/// Lowercase-alphanumeric slug with the `team-` prefix used by agent IDs.
pub fn id_prefix_for(role: &str) -> String {
    let slug: String = role
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("team-{slug}")
}

/// Registry of launchable configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigRegistry {
    pub configs: Vec<AgentConfig>,
}

/// Role aliases accepted from decision-engine output and task sources.
const ROLE_ALIASES: &[(&str, &str)] = &[
    ("coder", "SNTGreen"),
    ("tester", "SNTPurple"),
    ("reviewer", "SNTPurple"),
];

impl ConfigRegistry {
    /// Resolve an agent type: exact name, then role alias, then first config.
    pub fn resolve(&self, agent_type: &str) -> Option<&AgentConfig> {
        if let Some(c) = self.configs.iter().find(|c| c.name == agent_type) {
            return Some(c);
        }
        let lowered = agent_type.to_ascii_lowercase();
        if let Some((_, target)) = ROLE_ALIASES.iter().find(|(alias, _)| *alias == lowered) {
            if let Some(c) = self.configs.iter().find(|c| c.name == *target) {
                return Some(c);
            }
        }
        self.configs.first()
    }

    pub fn get(&self, name: &str) -> Option<&AgentConfig> {
        self.configs.iter().find(|c| c.name == name)
    }

    /// The built-in roster used when no config file overrides it.
    pub fn builtin() -> Self {
        let entry = |name: &str, color: &str, model: &str| AgentConfig {
            name: name.to_string(),
            color: Some(color.to_string()),
            model: Some(model.to_string()),
            command: "claude --dangerously-skip-permissions --mcp-config {config}".to_string(),
            access_level: AccessLevel::User,
        };
        Self {
            configs: vec![
                entry("SNTGreen", "green", "sonnet"),
                entry("SNTRed", "red", "sonnet"),
                entry("SNTPurple", "purple", "sonnet"),
                entry("OpusGreen", "green", "opus"),
                entry("OpusRed", "red", "opus"),
            ],
        }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Root for all persisted state (snapshot, memory db, transport configs).
    pub data_dir: PathBuf,
    pub bind: String,
    pub port: u16,
    /// Captain loop period in seconds.
    pub cycle_interval_secs: u64,
    /// Whether to drive a live tmux server; false selects the headless backend.
    pub tmux: bool,
    /// Session name the coordinator attaches to when driving tmux.
    pub tmux_session: String,
    #[serde(default)]
    pub roster: Option<ConfigRegistry>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./flotilla-data"),
            bind: "127.0.0.1".to_string(),
            port: 18901,
            cycle_interval_secs: 30,
            tmux: true,
            tmux_session: "flotilla".to_string(),
            roster: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.json")
    }

    pub fn task_file(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    /// Directory holding the per-agent tool-transport config files.
    pub fn transport_config_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    pub fn registry(&self) -> ConfigRegistry {
        self.roster.clone().unwrap_or_else(ConfigRegistry::builtin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_prefix_slugs_role_name() {
        assert_eq!(id_prefix_for("SNTGreen"), "team-sntgreen");
        assert_eq!(id_prefix_for("Opus Red"), "team-opusred");
    }

    #[test]
    fn registry_resolves_exact_then_alias_then_first() {
        let reg = ConfigRegistry::builtin();
        assert_eq!(reg.resolve("OpusRed").unwrap().name, "OpusRed");
        assert_eq!(reg.resolve("coder").unwrap().name, "SNTGreen");
        assert_eq!(reg.resolve("tester").unwrap().name, "SNTPurple");
        assert_eq!(reg.resolve("reviewer").unwrap().name, "SNTPurple");
        // Unknown types fall back to the first configured entry.
        assert_eq!(reg.resolve("archaeologist").unwrap().name, "SNTGreen");
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg = ConfigRegistry::default();
        assert!(reg.resolve("coder").is_none());
    }

    #[test]
    fn coordinator_config_defaults() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.cycle_interval_secs, 30);
        assert!(cfg.tmux);
        assert_eq!(cfg.snapshot_path(), PathBuf::from("./flotilla-data/state.json"));
    }

    #[test]
    fn coordinator_config_partial_json() {
        let cfg: CoordinatorConfig =
            serde_json::from_str(r#"{ "port": 9000, "tmux": false }"#).unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(!cfg.tmux);
        assert_eq!(cfg.cycle_interval_secs, 30);
    }
}
