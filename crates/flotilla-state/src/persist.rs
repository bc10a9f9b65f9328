//! Debounced snapshot persistence.
//!
//! Mutators nudge the persister; it coalesces every nudge inside a 500 ms
//! window into one serialization, written to a temp file and renamed into
//! place. Serialization happens on a cloned snapshot, never under the store
//! lock. Disk failures are logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::StateStore;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Start the persister worker. Cancelling the token flushes once and exits.
pub fn spawn_persister(store: Arc<StateStore>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = flush(&store).await {
                        warn!("final state flush failed: {e}");
                    }
                    return;
                }
                _ = store.dirty().notified() => {
                    // Coalesce the burst; anything arriving during the window
                    // lands in the same write.
                    tokio::time::sleep(DEBOUNCE_WINDOW).await;
                    if let Err(e) = flush(&store).await {
                        warn!("state snapshot write failed, will retry: {e}");
                        store.dirty().notify_one();
                    }
                }
            }
        }
    })
}

/// Serialize the current snapshot and atomically replace the file on disk.
pub async fn flush(store: &StateStore) -> std::io::Result<()> {
    let snapshot = store.snapshot().await;
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let path = store.path().to_path_buf();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes()).await?;
    tokio::fs::rename(&tmp, &path).await?;

    store.record_write();
    debug!("state snapshot written: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::Agent;

    #[tokio::test]
    async fn flush_writes_loadable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(&path);
        store
            .add_agent(Agent::new("team-sntgreen001", "SNTGreen", "SNTGreen"))
            .await
            .unwrap();
        flush(&store).await.unwrap();

        let reloaded = StateStore::load(&path);
        assert!(reloaded.get_agent("team-sntgreen001").await.is_some());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn flush_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(&path);
        store.append_activity("a", "tick", "").await;
        flush(&store).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
