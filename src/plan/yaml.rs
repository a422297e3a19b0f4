use anyhow::{Context, Result};
use std::path::Path;

use super::{Plan, PlanStore};
use crate::util::write_atomic;

/// Plan store over YAML files and Markdown files with YAML front matter.
#[derive(Debug, Clone, Default)]
pub struct YamlPlanStore;

impl YamlPlanStore {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(content: &str) -> Result<Plan> {
        match split_front_matter(content) {
            Some((front, body)) => {
                let mut plan: Plan =
                    serde_yaml::from_str(front).context("Failed to parse plan front matter")?;
                plan.body = Some(body.to_string());
                Ok(plan)
            }
            None => {
                if content.trim().is_empty() {
                    return Ok(Plan::default());
                }
                serde_yaml::from_str(content).context("Failed to parse plan YAML")
            }
        }
    }

    pub fn render(plan: &Plan) -> Result<String> {
        let yaml = serde_yaml::to_string(plan).context("Failed to serialize plan")?;
        Ok(match &plan.body {
            Some(body) => format!("---\n{}---\n{}", yaml, body),
            None => yaml,
        })
    }
}

/// Split `---`-delimited front matter from the Markdown body.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

impl PlanStore for YamlPlanStore {
    fn read_plan(&self, path: &Path) -> Result<Plan> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid plan file: {}", path.display()))
    }

    fn mark_tasks_done(&self, path: &Path, titles: &[String]) -> Result<usize> {
        if titles.is_empty() {
            return Ok(0);
        }
        let mut plan = self.read_plan(path)?;
        let mut changed = 0;
        for task in plan.tasks.iter_mut() {
            if !task.done && titles.iter().any(|t| t == &task.title) {
                task.done = true;
                changed += 1;
            }
        }
        if changed > 0 {
            write_atomic(path, &Self::render(&plan)?)?;
            tracing::info!(path = %path.display(), changed, "Marked plan tasks done");
        }
        Ok(changed)
    }
}
