//! Task intake — external task specs, type inference, recon heuristic.
//!
//! The classification precedence lives in a data table so task sources that
//! set an explicit type always win and the fallback stays unit-testable.

use std::path::PathBuf;

use chrono::Utc;
use flotilla_core::{Mission, Result, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A task as provided by an external source. Only `title` and `description`
/// are mandatory; everything else is inferred.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub needs_recon: Option<bool>,
}

/// Classification precedence: first table row whose keyword matches the
/// concatenated title+description wins.
const TYPE_RULES: &[(&[&str], TaskType)] = &[
    (&["scan", "recon", "audit", "discover"], TaskType::Recon),
    (&["review", "analyze", "assess"], TaskType::Analysis),
    (&["test", "coverage"], TaskType::Testing),
    (&["plan", "task", "api"], TaskType::Planning),
];

const RECON_KEYWORDS: &[&str] = &["security", "refactor", "architecture", "migrate"];

/// Infer a task type from free text. Fallback only: explicit types win.
pub fn classify_task_type(title: &str, description: &str) -> TaskType {
    let text = format!("{} {}", title, description).to_lowercase();
    for (keywords, task_type) in TYPE_RULES {
        if keywords.iter().any(|k| text.contains(k)) {
            return *task_type;
        }
    }
    TaskType::Implementation
}

/// Whether a task warrants a recon pass before planning.
pub fn needs_recon(task_type: TaskType, description: &str) -> bool {
    if matches!(task_type, TaskType::Implementation | TaskType::Analysis) {
        return true;
    }
    let lowered = description.to_lowercase();
    RECON_KEYWORDS.iter().any(|k| lowered.contains(k))
}

impl TaskSpec {
    /// Resolve inference fallbacks into a queued mission.
    pub fn into_mission(self) -> Mission {
        let task_type = self
            .task_type
            .unwrap_or_else(|| classify_task_type(&self.title, &self.description));
        let needs_recon = self
            .needs_recon
            .unwrap_or_else(|| needs_recon(task_type, &self.description));
        Mission {
            id: self
                .id
                .unwrap_or_else(|| format!("task-{}", uuid::Uuid::new_v4())),
            title: self.title,
            description: self.description,
            task_type,
            project_path: self.project_path,
            priority: self.priority.unwrap_or(0),
            requires_human: false,
            needs_recon,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Where new tasks come from.
#[async_trait::async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<TaskSpec>>;
}

/// Default source: a JSON array of task specs on disk, re-read every cycle.
pub struct FileTaskSource {
    path: PathBuf,
}

impl FileTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl TaskSource for FileTaskSource {
    async fn fetch(&self) -> Result<Vec<TaskSpec>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&data) {
            Ok(specs) => Ok(specs),
            Err(e) => {
                warn!("task file unparseable, ignoring this cycle: {e}");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_precedence_order() {
        assert_eq!(classify_task_type("Security audit", ""), TaskType::Recon);
        // "review" and "test" both present: review wins by precedence.
        assert_eq!(
            classify_task_type("Review the test suite", ""),
            TaskType::Analysis
        );
        assert_eq!(classify_task_type("Improve coverage", ""), TaskType::Testing);
        assert_eq!(classify_task_type("Plan the rollout", ""), TaskType::Planning);
        assert_eq!(
            classify_task_type("Ship the new widget", "add a button"),
            TaskType::Implementation
        );
    }

    #[test]
    fn classification_reads_description_too() {
        assert_eq!(
            classify_task_type("Widget work", "first scan the module layout"),
            TaskType::Recon
        );
    }

    #[test]
    fn recon_heuristic() {
        assert!(needs_recon(TaskType::Implementation, "anything"));
        assert!(needs_recon(TaskType::Analysis, "anything"));
        assert!(!needs_recon(TaskType::Testing, "add unit tests"));
        assert!(needs_recon(TaskType::Testing, "test the security model"));
        assert!(needs_recon(TaskType::Planning, "plan the database migrate"));
    }

    #[test]
    fn explicit_fields_win_over_inference() {
        let spec = TaskSpec {
            id: Some("t-1".into()),
            title: "Security audit".into(),
            description: String::new(),
            task_type: Some(TaskType::Planning),
            project_path: None,
            priority: Some(5),
            needs_recon: Some(false),
        };
        let mission = spec.into_mission();
        assert_eq!(mission.task_type, TaskType::Planning);
        assert!(!mission.needs_recon);
        assert_eq!(mission.priority, 5);
        assert_eq!(mission.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn file_source_tolerates_missing_file() {
        let source = FileTaskSource::new("/nonexistent/tasks.json");
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_source_reads_specs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"[{ "id": "t-1", "title": "Audit auth", "description": "security review" }]"#,
        )
        .unwrap();
        let specs = FileTaskSource::new(&path).fetch().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id.as_deref(), Some("t-1"));
    }
}
