//! tmux backend for [`PaneController`].

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::{Error, Result};
use tokio::process::Command;
use tracing::debug;

use crate::throttle::RpcGate;
use crate::{PaneController, PaneInfo, SplitDirection};

const LIST_FORMAT: &str =
    "#{pane_id}|#{window_index}|#{pane_active}|#{pane_width}|#{pane_height}|#{pane_current_command}";

pub struct TmuxPanes {
    gate: Arc<RpcGate>,
    rpc_timeout: Duration,
}

impl Default for TmuxPanes {
    fn default() -> Self {
        Self::new(Arc::new(RpcGate::default()), Duration::from_secs(5))
    }
}

impl TmuxPanes {
    pub fn new(gate: Arc<RpcGate>, rpc_timeout: Duration) -> Self {
        Self { gate, rpc_timeout }
    }

    async fn run_tmux(&self, args: &[&str]) -> Result<String> {
        let _pass = self.gate.pass().await;
        debug!("tmux {}", args.join(" "));
        let output = tokio::time::timeout(
            self.rpc_timeout,
            Command::new("tmux").args(args).output(),
        )
        .await
        .map_err(|_| Error::PaneUnavailable(format!("tmux rpc timed out: {}", args.join(" "))))?
        .map_err(|e| Error::PaneUnavailable(format!("tmux exec failed: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("can't find pane") || stderr.contains("can't find window") {
                Err(Error::PaneNotFound(stderr.trim().to_string()))
            } else {
                Err(Error::PaneUnavailable(format!("tmux error: {}", stderr.trim())))
            }
        }
    }

    /// Whether the coordinator itself is running inside tmux.
    pub fn inside_tmux() -> bool {
        std::env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub async fn session_exists(&self, name: &str) -> bool {
        self.run_tmux(&["has-session", "-t", name]).await.is_ok()
    }

    pub async fn new_session(&self, name: &str, cwd: Option<&str>) -> Result<()> {
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(dir) = cwd {
            args.extend_from_slice(&["-c", dir]);
        }
        self.run_tmux(&args).await.map(|_| ())
    }
}

fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let mut parts = line.splitn(6, '|');
    let id = parts.next()?.to_string();
    let window = parts.next()?.parse().ok()?;
    let active = parts.next()? == "1";
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    let current_command = parts.next().map(|c| c.to_string()).filter(|c| !c.is_empty());
    Some(PaneInfo {
        id,
        window,
        active,
        width,
        height,
        current_command,
    })
}

#[async_trait::async_trait]
impl PaneController for TmuxPanes {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let out = self.run_tmux(&["list-panes", "-a", "-F", LIST_FORMAT]).await?;
        Ok(out.lines().filter_map(parse_pane_line).collect())
    }

    async fn split_pane(
        &self,
        parent: &str,
        direction: SplitDirection,
        percent: u8,
        cwd: Option<&str>,
    ) -> Result<String> {
        let percent = percent.clamp(1, 99).to_string();
        let mut args = vec!["split-window", "-d", "-P", "-F", "#{pane_id}", "-t", parent];
        match direction {
            SplitDirection::Below => args.push("-v"),
            SplitDirection::Above => args.extend_from_slice(&["-v", "-b"]),
            SplitDirection::Right => args.push("-h"),
        }
        args.extend_from_slice(&["-p", &percent]);
        if let Some(dir) = cwd {
            args.extend_from_slice(&["-c", dir]);
        }
        let out = self.run_tmux(&args).await?;
        Ok(out.trim().to_string())
    }

    async fn send_text(&self, pane: &str, text: &str) -> Result<()> {
        self.run_tmux(&["send-keys", "-t", pane, text, "Enter"])
            .await
            .map(|_| ())
    }

    async fn read_screen(&self, pane: &str, lines: Option<u32>) -> Result<String> {
        match lines {
            Some(n) => {
                let start = format!("-{n}");
                self.run_tmux(&["capture-pane", "-t", pane, "-p", "-S", &start]).await
            }
            None => self.run_tmux(&["capture-pane", "-t", pane, "-p"]).await,
        }
    }

    async fn close_pane(&self, pane: &str) -> Result<()> {
        self.run_tmux(&["kill-pane", "-t", pane]).await.map(|_| ())
    }

    async fn new_window(&self, name: &str, command: &str, cwd: Option<&str>) -> Result<String> {
        let mut args = vec!["new-window", "-d", "-P", "-F", "#{pane_id}", "-n", name];
        if let Some(dir) = cwd {
            args.extend_from_slice(&["-c", dir]);
        }
        args.push(command);
        let out = self.run_tmux(&args).await?;
        Ok(out.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pane_line_full() {
        let info = parse_pane_line("%3|1|1|212|50|claude").unwrap();
        assert_eq!(info.id, "%3");
        assert_eq!(info.window, 1);
        assert!(info.active);
        assert_eq!(info.width, 212);
        assert_eq!(info.height, 50);
        assert_eq!(info.current_command.as_deref(), Some("claude"));
    }

    #[test]
    fn parse_pane_line_without_command() {
        let info = parse_pane_line("%0|0|0|80|24|").unwrap();
        assert!(!info.active);
        assert!(info.current_command.is_none());
    }

    #[test]
    fn parse_pane_line_rejects_garbage() {
        assert!(parse_pane_line("not a pane line").is_none());
        assert!(parse_pane_line("").is_none());
    }
}
