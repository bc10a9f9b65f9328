//! Headless in-memory backend for [`PaneController`].
//!
//! Used by tests and `--no-tmux` operation. Honors the same global RPC gate
//! as the live backend so timing contracts hold either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use flotilla_core::{Error, Result};
use tokio::sync::Mutex;

use crate::throttle::RpcGate;
use crate::{PaneController, PaneInfo, SplitDirection};

#[derive(Clone, Debug)]
struct SimPane {
    info: PaneInfo,
    content: Vec<String>,
}

pub struct HeadlessPanes {
    gate: Arc<RpcGate>,
    panes: Mutex<HashMap<String, SimPane>>,
    next_id: AtomicU32,
}

impl Default for HeadlessPanes {
    fn default() -> Self {
        Self::new(Arc::new(RpcGate::default()))
    }
}

impl HeadlessPanes {
    pub fn new(gate: Arc<RpcGate>) -> Self {
        // Pane %0 plays the captain's pane, like a fresh tmux session.
        let next_id = AtomicU32::new(0);
        let id = format!("%{}", next_id.fetch_add(1, Ordering::SeqCst));
        let mut panes = HashMap::new();
        panes.insert(
            id.clone(),
            SimPane {
                info: PaneInfo {
                    id,
                    window: 0,
                    active: true,
                    width: 212,
                    height: 50,
                    current_command: None,
                },
                content: Vec::new(),
            },
        );
        Self {
            gate,
            panes: Mutex::new(panes),
            next_id,
        }
    }

    fn alloc_id(&self) -> String {
        format!("%{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Test hook: inject output as if the hosted process had printed it.
    pub async fn inject_output(&self, pane: &str, text: &str) -> Result<()> {
        let mut panes = self.panes.lock().await;
        let sim = panes
            .get_mut(pane)
            .ok_or_else(|| Error::PaneNotFound(pane.to_string()))?;
        sim.content.extend(text.lines().map(String::from));
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaneController for HeadlessPanes {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let _pass = self.gate.pass().await;
        let panes = self.panes.lock().await;
        let mut infos: Vec<PaneInfo> = panes.values().map(|p| p.info.clone()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    async fn split_pane(
        &self,
        parent: &str,
        _direction: SplitDirection,
        _percent: u8,
        _cwd: Option<&str>,
    ) -> Result<String> {
        let _pass = self.gate.pass().await;
        let mut panes = self.panes.lock().await;
        if !panes.contains_key(parent) {
            return Err(Error::PaneNotFound(parent.to_string()));
        }
        let window = panes[parent].info.window;
        let id = self.alloc_id();
        panes.insert(
            id.clone(),
            SimPane {
                info: PaneInfo {
                    id: id.clone(),
                    window,
                    active: false,
                    width: 212,
                    height: 25,
                    current_command: None,
                },
                content: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn send_text(&self, pane: &str, text: &str) -> Result<()> {
        let _pass = self.gate.pass().await;
        let mut panes = self.panes.lock().await;
        let sim = panes
            .get_mut(pane)
            .ok_or_else(|| Error::PaneNotFound(pane.to_string()))?;
        sim.content.push(text.to_string());
        Ok(())
    }

    async fn read_screen(&self, pane: &str, lines: Option<u32>) -> Result<String> {
        let _pass = self.gate.pass().await;
        let panes = self.panes.lock().await;
        let sim = panes
            .get(pane)
            .ok_or_else(|| Error::PaneNotFound(pane.to_string()))?;
        let content = &sim.content;
        let take = lines.map(|n| n as usize).unwrap_or(sim.info.height as usize);
        let start = content.len().saturating_sub(take);
        Ok(content[start..].join("\n"))
    }

    async fn close_pane(&self, pane: &str) -> Result<()> {
        let _pass = self.gate.pass().await;
        let mut panes = self.panes.lock().await;
        panes
            .remove(pane)
            .map(|_| ())
            .ok_or_else(|| Error::PaneNotFound(pane.to_string()))
    }

    async fn new_window(&self, _name: &str, command: &str, _cwd: Option<&str>) -> Result<String> {
        let _pass = self.gate.pass().await;
        let mut panes = self.panes.lock().await;
        let window = panes.values().map(|p| p.info.window).max().unwrap_or(0) + 1;
        let id = self.alloc_id();
        panes.insert(
            id.clone(),
            SimPane {
                info: PaneInfo {
                    id: id.clone(),
                    window,
                    active: false,
                    width: 212,
                    height: 50,
                    current_command: Some(
                        command.split_whitespace().next().unwrap_or("").to_string(),
                    ),
                },
                content: Vec::new(),
            },
        );
        Ok(id)
    }
}
