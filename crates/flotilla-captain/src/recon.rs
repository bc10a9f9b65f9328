//! One-shot recon runs.
//!
//! A recon child is a transient agent in subagent mode: its stdout is
//! captured and parsed, it never gets a pane. Children get purpose-hash
//! names so they are addressable while running and in the logs after.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_core::{Error, Report, Result};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::parser::parse_report;

pub const RECON_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Generate a purpose-hash name: readable prefix, short hash suffix.
pub fn purpose_hash_name(purpose: &str) -> String {
    let words: Vec<&str> = purpose
        .split_whitespace()
        .filter(|w| w.len() > 1)
        .take(4)
        .collect();

    let prefix = if words.is_empty() {
        "recon".to_string()
    } else {
        words
            .iter()
            .map(|w| {
                w.to_lowercase()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("-")
    };
    let prefix = if prefix.len() > 20 { prefix[..20].to_string() } else { prefix };

    let mut hasher = DefaultHasher::new();
    purpose.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    let suffix = format!("{:05x}", hasher.finish() & 0xFFFFF);

    format!("{prefix}-{suffix}")
}

/// Runs the actual recon subprocess. Swappable for tests.
#[async_trait::async_trait]
pub trait ReconInvoker: Send + Sync {
    /// Returns the child's raw stdout.
    async fn run(&self, mission: &str, project_path: Option<&str>) -> Result<String>;
}

/// Spawns the external CLI in print mode and captures stdout.
pub struct SubprocessRecon {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SubprocessRecon {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["-p".to_string()],
        }
    }
}

#[async_trait::async_trait]
impl ReconInvoker for SubprocessRecon {
    async fn run(&self, mission: &str, project_path: Option<&str>) -> Result<String> {
        let prompt = format!(
            "You are a recon agent. Mission: {mission}. Survey the project and print \
             a single YAML report with sections agent-id, environment, mission, \
             findings (critical/high/medium/low), summary, recommendations \
             (immediate/short_term/long_term). Print nothing else."
        );
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(&prompt);
        if let Some(dir) = project_path {
            cmd.current_dir(dir);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::spawn_failed(format!("recon subprocess: {e}")))?;
        if !output.status.success() {
            return Err(Error::spawn_failed(format!(
                "recon exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// A recon child currently in flight.
#[derive(Clone, Debug, Serialize)]
pub struct ReconChild {
    pub id: String,
    pub mission: String,
    pub project_path: Option<String>,
    pub started_at: DateTime<Utc>,
}

pub struct ReconRunner {
    invoker: std::sync::Arc<dyn ReconInvoker>,
    timeout: Duration,
    active: Mutex<HashMap<String, ReconChild>>,
}

impl ReconRunner {
    pub fn new(invoker: std::sync::Arc<dyn ReconInvoker>, timeout: Duration) -> Self {
        Self {
            invoker,
            timeout,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Currently running recon children, for the status API.
    pub async fn active(&self) -> Vec<ReconChild> {
        let mut children: Vec<ReconChild> = self.active.lock().await.values().cloned().collect();
        children.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        children
    }

    /// Run one recon to completion and parse its report.
    pub async fn run_recon(&self, mission: &str, project_path: Option<&str>) -> Result<Report> {
        let id = purpose_hash_name(mission);
        self.run_recon_with_id(&id, mission, project_path).await
    }

    /// Same as [`run_recon`](Self::run_recon) with a caller-allocated id, so
    /// the id can be handed out before the run completes.
    pub async fn run_recon_with_id(
        &self,
        id: &str,
        mission: &str,
        project_path: Option<&str>,
    ) -> Result<Report> {
        let id = id.to_string();
        let child = ReconChild {
            id: id.clone(),
            mission: mission.to_string(),
            project_path: project_path.map(String::from),
            started_at: Utc::now(),
        };
        self.active.lock().await.insert(id.clone(), child);
        info!("recon {id} started: {mission}");

        let result = tokio::time::timeout(self.timeout, self.invoker.run(mission, project_path))
            .await
            .map_err(|_| Error::Timeout(format!("recon {id} exceeded {:?}", self.timeout)))
            .and_then(|r| r);

        self.active.lock().await.remove(&id);

        let stdout = result?;
        match parse_report(&stdout) {
            Ok(report) => {
                info!("recon {id} parsed: {} findings", report.findings.total());
                Ok(report)
            }
            Err(e) => {
                warn!("recon {id} output unparseable: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct CannedRecon(String);

    #[async_trait::async_trait]
    impl ReconInvoker for CannedRecon {
        async fn run(&self, _mission: &str, _project_path: Option<&str>) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct HangingRecon;

    #[async_trait::async_trait]
    impl ReconInvoker for HangingRecon {
        async fn run(&self, _mission: &str, _project_path: Option<&str>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    #[test]
    fn purpose_hash_names_are_readable_and_distinct() {
        let a = purpose_hash_name("scan the auth module for weak spots");
        let b = purpose_hash_name("scan the auth module for weak spots");
        assert!(a.starts_with("scan-the-auth-module-"));
        assert_ne!(a, b, "hash suffix should differ across invocations");
    }

    #[tokio::test]
    async fn run_recon_parses_and_clears_active_set() {
        let yaml = r#"
agent-id: recon-x
environment: proj
mission: sweep
findings: {}
summary: {}
recommendations: {}
"#;
        let runner = ReconRunner::new(Arc::new(CannedRecon(yaml.to_string())), RECON_TIMEOUT);
        let report = runner.run_recon("sweep", None).await.unwrap();
        assert_eq!(report.agent_id, "recon-x");
        assert!(runner.active().await.is_empty());
    }

    #[tokio::test]
    async fn run_recon_times_out() {
        let runner = ReconRunner::new(Arc::new(HangingRecon), Duration::from_millis(50));
        let err = runner.run_recon("sweep", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(runner.active().await.is_empty());
    }

    #[tokio::test]
    async fn unparseable_output_is_invalid_input() {
        let runner = ReconRunner::new(
            Arc::new(CannedRecon("I looked around and found nothing!".into())),
            RECON_TIMEOUT,
        );
        let err = runner.run_recon("sweep", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
