//! Whole-coordinator integration: wiring, headless spawn path, graceful stop
//! signalling through a live session.

use std::time::Duration;

use flotilla::wiring;
use flotilla_core::{AccessLevel, AgentStatus, CoordinatorConfig, TaskStatus};
use flotilla_captain::TaskSpec;
use flotilla_spawn::StopSignaller;

fn test_config(dir: &std::path::Path, port: u16) -> CoordinatorConfig {
    CoordinatorConfig {
        data_dir: dir.to_path_buf(),
        bind: "127.0.0.1".to_string(),
        port,
        cycle_interval_secs: 1,
        tmux: false,
        ..CoordinatorConfig::default()
    }
}

#[tokio::test]
async fn build_wires_a_headless_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = wiring::build(&test_config(dir.path(), 18911), false)
        .await
        .unwrap();
    assert!(coordinator.supervisor.is_none());
    assert!(coordinator.sessions.is_empty());
    assert_eq!(coordinator.store.snapshot().await.agents.len(), 0);
    coordinator.cancel.cancel();
}

#[tokio::test]
async fn direct_task_spawns_an_agent_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = wiring::build(&test_config(dir.path(), 18912), false)
        .await
        .unwrap();

    // Testing-type tasks skip recon and dispatch a single agent directly.
    let task_id = coordinator
        .captain
        .submit_task(TaskSpec {
            id: Some("t-tests".into()),
            title: "Raise coverage".into(),
            description: "add tests for the parser module".into(),
            task_type: None,
            project_path: None,
            priority: None,
            needs_recon: Some(false),
        })
        .await;
    coordinator.captain.run_cycle().await;
    assert_eq!(
        coordinator.captain.get_task(&task_id).await.unwrap().status,
        TaskStatus::Executing
    );

    // The dispatch worker spawns asynchronously; wait it out.
    let mut spawned = Vec::new();
    for _ in 0..200 {
        spawned = coordinator.store.list_agents().await;
        if !spawned.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(spawned.len(), 1, "one direct agent expected");
    // "Raise coverage" classifies as testing, which maps to SNTPurple.
    assert!(spawned[0].id.starts_with("team-sntpurple"));
    assert_eq!(spawned[0].status, AgentStatus::Spawning);
    assert!(spawned[0].pane.is_some());

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn graceful_stop_reaches_the_live_session() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = wiring::build(&test_config(dir.path(), 18913), false)
        .await
        .unwrap();

    let handle = coordinator
        .spawner
        .spawn_agent("SNTGreen", "idle around", None)
        .await
        .unwrap();

    // The agent connects a tool-call session.
    let session = coordinator
        .sessions
        .create(&handle.agent_id, AccessLevel::User, None);
    assert!(
        coordinator
            .sessions
            .signal_shutdown(&handle.agent_id, "wrap up")
            .await
    );

    coordinator
        .spawner
        .stop_agent(&handle.agent_id, "test shutdown")
        .await
        .unwrap();
    let agent = coordinator.store.get_agent(&handle.agent_id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Stopping);

    // Both the explicit signal and the stop request landed on the queue.
    let first = session.next_event().await.unwrap();
    assert_eq!(first.event, "shutdown_request");

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn state_snapshot_lands_on_disk_after_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 18914);
    {
        let coordinator = wiring::build(&config, false).await.unwrap();
        coordinator
            .store
            .append_activity("captain", "boot", "integration test")
            .await;
        coordinator.cancel.cancel();
        // The persister flushes on cancellation.
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    let reloaded = flotilla_state::StateStore::load(config.snapshot_path());
    let snap = reloaded.snapshot().await;
    assert!(snap.activity_log.iter().any(|e| e.action == "boot"));
}
