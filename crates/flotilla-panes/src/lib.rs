//! Pane control — the coordinator's view of the terminal multiplexer.
//!
//! Two realizations of [`PaneController`]: a live tmux backend and an
//! in-memory headless simulator. All multiplexer RPCs pass through one
//! global gate that serializes them with a minimum inter-call gap, because
//! tmux servers freeze under RPC storms.

pub mod headless;
pub mod throttle;
pub mod tmux;

use flotilla_core::Result;
use serde::{Deserialize, Serialize};

pub use headless::HeadlessPanes;
pub use throttle::{RpcGate, MIN_RPC_GAP};
pub use tmux::TmuxPanes;

/// One pane as reported by the multiplexer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PaneInfo {
    pub id: String,
    pub window: u32,
    pub active: bool,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub current_command: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    Below,
    Above,
    Right,
}

/// Abstraction over the terminal multiplexer.
///
/// `send_text` appends an implicit line terminator. `close_panes` iterates
/// internally honoring the global RPC gap; callers must not loop
/// `close_pane` themselves.
#[async_trait::async_trait]
pub trait PaneController: Send + Sync {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    /// Split `parent` and return the new pane's id. `percent` is the size of
    /// the new pane.
    async fn split_pane(
        &self,
        parent: &str,
        direction: SplitDirection,
        percent: u8,
        cwd: Option<&str>,
    ) -> Result<String>;

    async fn send_text(&self, pane: &str, text: &str) -> Result<()>;

    /// Read the visible screen, optionally including `lines` of scrollback.
    async fn read_screen(&self, pane: &str, lines: Option<u32>) -> Result<String>;

    async fn close_pane(&self, pane: &str) -> Result<()>;

    /// Close a batch of panes, one gated RPC at a time. Returns the ids that
    /// could not be closed.
    async fn close_panes(&self, panes: &[String]) -> Vec<String> {
        let mut failed = Vec::new();
        for pane in panes {
            if self.close_pane(pane).await.is_err() {
                failed.push(pane.clone());
            }
        }
        failed
    }

    /// Open a detached window running `command`; returns the new pane id.
    async fn new_window(&self, name: &str, command: &str, cwd: Option<&str>) -> Result<String>;
}
