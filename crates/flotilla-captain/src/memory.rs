//! Learned-knowledge store boundary.
//!
//! The real memory database is an external collaborator; the captain only
//! needs put/get/list keyed by environment. The default implementation is a
//! JSON file under the data directory.

use std::collections::HashMap;
use std::path::PathBuf;

use flotilla_core::Result;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put(&self, environment: &str, key: &str, value: Value) -> Result<()>;
    async fn get(&self, environment: &str, key: &str) -> Result<Option<Value>>;
    async fn list_keys(&self, environment: &str) -> Result<Vec<String>>;
}

/// Environment names come from project paths; keep them filesystem- and
/// key-safe.
pub fn sanitize_environment(project_path: &str) -> String {
    let cleaned: String = project_path
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned
    }
}

type MemoryMap = HashMap<String, HashMap<String, Value>>;

pub struct JsonFileMemory {
    path: PathBuf,
    entries: Mutex<MemoryMap>,
}

impl JsonFileMemory {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!("memory db unreadable, starting fresh: {e}");
                MemoryMap::new()
            }),
            Err(_) => MemoryMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    async fn persist(&self, entries: &MemoryMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemoryStore for JsonFileMemory {
    async fn put(&self, environment: &str, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(environment.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&entries).await
    }

    async fn get(&self, environment: &str, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(environment).and_then(|m| m.get(key)).cloned())
    }

    async fn list_keys(&self, environment: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .get(environment)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
