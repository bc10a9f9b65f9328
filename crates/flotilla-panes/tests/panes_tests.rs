//! Integration tests for pane control: simulator semantics and the global
//! RPC gap contract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flotilla_core::Error;
use flotilla_panes::{HeadlessPanes, PaneController, RpcGate, SplitDirection};

fn fast_panes() -> HeadlessPanes {
    // Tight gap so functional tests stay quick; timing tests build their own.
    HeadlessPanes::new(Arc::new(RpcGate::new(Duration::from_millis(1))))
}

#[tokio::test]
async fn split_send_read_close_roundtrip() {
    let panes = fast_panes();
    let new = panes
        .split_pane("%0", SplitDirection::Below, 30, Some("/tmp"))
        .await
        .unwrap();
    panes.send_text(&new, "claude --continue").await.unwrap();
    panes.send_text(&new, "hello").await.unwrap();

    let screen = panes.read_screen(&new, None).await.unwrap();
    assert!(screen.contains("claude --continue"));
    assert!(screen.ends_with("hello"));

    panes.close_pane(&new).await.unwrap();
    let err = panes.read_screen(&new, None).await.unwrap_err();
    assert!(matches!(err, Error::PaneNotFound(_)));
}

#[tokio::test]
async fn read_screen_limits_lines() {
    let panes = fast_panes();
    for i in 0..10 {
        panes.send_text("%0", &format!("line {i}")).await.unwrap();
    }
    let tail = panes.read_screen("%0", Some(3)).await.unwrap();
    assert_eq!(tail, "line 7\nline 8\nline 9");
}

#[tokio::test]
async fn split_of_unknown_parent_fails() {
    let panes = fast_panes();
    let err = panes
        .split_pane("%99", SplitDirection::Below, 30, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PaneNotFound(_)));
}

#[tokio::test]
async fn new_window_allocates_fresh_window_index() {
    let panes = fast_panes();
    let id = panes.new_window("captain", "flotilla-captain", None).await.unwrap();
    let infos = panes.list_panes().await.unwrap();
    let created = infos.iter().find(|p| p.id == id).unwrap();
    assert_eq!(created.window, 1);
    assert_eq!(created.current_command.as_deref(), Some("flotilla-captain"));
}

#[tokio::test]
async fn close_panes_batch_reports_failures_and_continues() {
    let panes = fast_panes();
    let a = panes.split_pane("%0", SplitDirection::Below, 30, None).await.unwrap();
    let b = panes.split_pane("%0", SplitDirection::Below, 30, None).await.unwrap();
    let failed = panes
        .close_panes(&[a.clone(), "%404".to_string(), b.clone()])
        .await;
    assert_eq!(failed, vec!["%404".to_string()]);
    assert_eq!(panes.list_panes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_closes_respect_minimum_gap() {
    // 10 concurrent closes through a 200 ms gate must take >= 1.8 s total.
    let panes = Arc::new(HeadlessPanes::new(Arc::new(RpcGate::new(
        Duration::from_millis(200),
    ))));
    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(
            panes
                .split_pane("%0", SplitDirection::Below, 10, None)
                .await
                .unwrap(),
        );
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for id in ids.clone() {
        let panes = panes.clone();
        handles.push(tokio::spawn(async move { panes.close_pane(&id).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert!(
        start.elapsed() >= Duration::from_millis(1800),
        "closes completed too fast: {:?}",
        start.elapsed()
    );
    assert_eq!(panes.list_panes().await.unwrap().len(), 1);
}
