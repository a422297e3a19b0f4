//! Plan files: the checklist of tasks an orchestration run works through.
//!
//! A plan is YAML, either a whole `.yml` file or the front matter of a
//! Markdown file:
//!
//! ```markdown
//! ---
//! title: Response cache
//! tasks:
//!   - title: Add cache module
//!     done: false
//!   - title: Wire the cache into the CLI
//! ---
//!
//! Free-form notes for the implementer.
//! ```
//!
//! Fields anvil does not know about are preserved when the plan is written back.

mod yaml;

pub use yaml::YamlPlanStore;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            done: false,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
    /// Markdown following the front matter, if the plan had any.
    #[serde(skip)]
    pub body: Option<String>,
}

impl Plan {
    pub fn title(&self) -> Option<&str> {
        self.extra.get("title").and_then(|v| v.as_str())
    }

    pub fn pending_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| !t.done).collect()
    }

    pub fn completed_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.done).collect()
    }
}

/// Storage for plan files.
pub trait PlanStore: Send + Sync {
    fn read_plan(&self, path: &Path) -> Result<Plan>;

    /// Mark the tasks with exactly these titles done. Returns how many changed.
    fn mark_tasks_done(&self, path: &Path, titles: &[String]) -> Result<usize>;
}
