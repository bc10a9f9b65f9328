//! Integration tests for the spawner: ID allocation, transport config,
//! registration ordering, stop lifecycle.

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::{AgentStatus, ConfigRegistry};
use flotilla_panes::{HeadlessPanes, PaneController, RpcGate};
use flotilla_spawn::{Spawner, SpawnerConfig, TransportConfig};
use flotilla_state::StateStore;
use tokio::sync::watch;

struct Fixture {
    store: Arc<StateStore>,
    panes: Arc<HeadlessPanes>,
    spawner: Arc<Spawner>,
    captain_tx: watch::Sender<Option<String>>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json"));
    let panes = Arc::new(HeadlessPanes::new(Arc::new(RpcGate::new(
        Duration::from_millis(1),
    ))));
    let (captain_tx, captain_rx) = watch::channel(None);
    let config = SpawnerConfig {
        transport_config_dir: dir.path().join("agents"),
        prompt_delay: Duration::from_millis(5),
        stop_deadline: Duration::from_millis(100),
        ..SpawnerConfig::default()
    };
    let spawner = Arc::new(Spawner::new(
        store.clone(),
        panes.clone() as Arc<dyn PaneController>,
        ConfigRegistry::builtin(),
        config,
        captain_rx,
    ));
    Fixture {
        store,
        panes,
        spawner,
        captain_tx,
        _dir: dir,
    }
}

#[tokio::test]
async fn spawn_allocates_sequential_role_scoped_ids() {
    let fx = fixture();
    fx.captain_tx.send(Some("%0".to_string())).unwrap();

    let a = fx.spawner.spawn_agent("SNTGreen", "go", Some("/p")).await.unwrap();
    let b = fx.spawner.spawn_agent("SNTGreen", "go", Some("/p")).await.unwrap();
    let c = fx.spawner.spawn_agent("OpusRed", "go", Some("/p")).await.unwrap();

    assert_eq!(a.agent_id, "team-sntgreen001");
    assert_eq!(b.agent_id, "team-sntgreen002");
    assert_eq!(c.agent_id, "team-opusred001");
}

#[tokio::test]
async fn spawn_registers_agent_with_pane_before_prompt() {
    let fx = fixture();
    fx.captain_tx.send(Some("%0".to_string())).unwrap();

    let handle = fx.spawner.spawn_agent("SNTGreen", "kickoff text", None).await.unwrap();
    let agent = fx.store.get_agent(&handle.agent_id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Spawning);
    assert_eq!(agent.pane.as_deref(), Some(handle.pane.as_str()));
    assert!(agent.pid.is_none());

    // Launch command and kickoff prompt both landed in the pane.
    let screen = fx.panes.read_screen(&handle.pane, None).await.unwrap();
    assert!(screen.contains("claude"));
    assert!(screen.contains("kickoff text"));
}

#[tokio::test]
async fn transport_config_written_with_identity() {
    let fx = fixture();
    fx.captain_tx.send(Some("%0".to_string())).unwrap();

    let handle = fx.spawner.spawn_agent("SNTRed", "go", Some("/proj")).await.unwrap();
    let path = fx
        ._dir
        .path()
        .join("agents")
        .join(format!("{}.json", handle.agent_id));
    let raw = std::fs::read_to_string(&path).unwrap();
    let transport: TransportConfig = serde_json::from_str(&raw).unwrap();
    assert_eq!(transport.agent_id, handle.agent_id);
    assert_eq!(transport.project_path.as_deref(), Some("/proj"));
    assert!(transport.server_url.starts_with("http"));
}

#[tokio::test]
async fn spawn_without_captain_pane_opens_window() {
    let fx = fixture();
    // No captain pane published: window mode.
    let handle = fx.spawner.spawn_agent("SNTPurple", "go", None).await.unwrap();
    let infos = fx.panes.list_panes().await.unwrap();
    let created = infos.iter().find(|p| p.id == handle.pane).unwrap();
    assert!(created.window > 0);
}

#[tokio::test]
async fn role_alias_resolves_before_spawn() {
    let fx = fixture();
    fx.captain_tx.send(Some("%0".to_string())).unwrap();
    let handle = fx.spawner.spawn_agent("coder", "go", None).await.unwrap();
    assert!(handle.agent_id.starts_with("team-sntgreen"));
}

#[tokio::test]
async fn stop_deadline_force_kills_unresponsive_agent() {
    let fx = fixture();
    fx.captain_tx.send(Some("%0".to_string())).unwrap();
    let handle = fx.spawner.spawn_agent("SNTGreen", "go", None).await.unwrap();

    fx.spawner.stop_agent(&handle.agent_id, "wrap up").await.unwrap();
    let agent = fx.store.get_agent(&handle.agent_id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Stopping);
    assert!(agent.shutdown_requested_at.is_some());

    // Deadline in the fixture is 100 ms; the agent never answers.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(fx.store.get_agent(&handle.agent_id).await.is_none());
    let panes = fx.panes.list_panes().await.unwrap();
    assert!(!panes.iter().any(|p| p.id == handle.pane));
}

#[tokio::test]
async fn double_stop_is_a_precondition_failure() {
    let fx = fixture();
    fx.captain_tx.send(Some("%0".to_string())).unwrap();
    let handle = fx.spawner.spawn_agent("SNTGreen", "go", None).await.unwrap();
    fx.spawner.stop_agent(&handle.agent_id, "first").await.unwrap();
    let err = fx.spawner.stop_agent(&handle.agent_id, "second").await.unwrap_err();
    assert!(matches!(err, flotilla_core::Error::PreconditionFailed(_)));
}
