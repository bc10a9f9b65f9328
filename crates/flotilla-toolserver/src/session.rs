//! Per-connection session state with bounded outbound event queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use flotilla_core::{AccessLevel, EventMessage};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

/// Outbound queue bound. When full, the oldest event is dropped.
pub const EVENT_QUEUE_CAP: usize = 256;

pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub access: AccessLevel,
    pub project_path: Option<String>,
    queue: Mutex<VecDeque<EventMessage>>,
    notify: Notify,
    dropped: AtomicU64,
    connected: AtomicBool,
}

impl Session {
    fn new(agent_id: &str, access: AccessLevel, project_path: Option<String>) -> Self {
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            agent_id: agent_id.to_string(),
            access,
            project_path,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        }
    }

    /// Enqueue an event for the stream writer. FIFO; drops oldest when full.
    pub async fn push_event(&self, event: EventMessage) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= EVENT_QUEUE_CAP {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    /// Next event in publish order; waits until one is available. Returns
    /// `None` once the session is disconnected and drained.
    pub async fn next_event(&self) -> Option<EventMessage> {
        loop {
            if let Some(evt) = self.queue.lock().await.pop_front() {
                return Some(evt);
            }
            if !self.is_connected() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Events discarded due to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        // Wake any writer blocked on an empty queue so it can observe the close.
        self.notify.notify_one();
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and register a session for an agent stream.
    pub fn create(
        &self,
        agent_id: &str,
        access: AccessLevel,
        project_path: Option<String>,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(agent_id, access, project_path));
        info!(
            "session {} opened for agent {} ({:?})",
            session.id, agent_id, access
        );
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// A live session for an agent, if any.
    pub fn find_by_agent(&self, agent_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .map(|e| e.value().clone())
            .find(|s| s.agent_id == agent_id && s.is_connected())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if let Some(s) = &removed {
            s.mark_disconnected();
            debug!("session {} removed (agent {})", s.id, s.agent_id);
        }
        removed
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Lets the spawner deliver graceful-stop requests through live sessions.
#[async_trait::async_trait]
impl flotilla_spawn::StopSignaller for SessionRegistry {
    async fn signal_shutdown(&self, agent_id: &str, reason: &str) -> bool {
        match self.find_by_agent(agent_id) {
            Some(session) => {
                session
                    .push_event(EventMessage::shutdown_request(reason))
                    .await;
                true
            }
            None => false,
        }
    }
}
