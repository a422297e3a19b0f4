//! Detection of an Implement phase that only described what it would do.

use regex::Regex;
use std::sync::LazyLock;

use crate::repo::RepoState;

/// Phrasing that signals intent rather than action.
static PLANNING_INDICATORS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "future-tense action",
            r"(?i)\bI(?:'ll| will| would| am going to|'m going to)\s+(?:now\s+|first\s+|then\s+)?(?:create|add|implement|modify|update|write|change|edit|refactor|start|make)\b",
        ),
        (
            "plan announcement",
            r"(?i)\bhere(?:'s| is) (?:my|the|a) (?:plan|approach|proposed)\b",
        ),
        ("plan heading", r"(?im)^#+\s*(?:implementation\s+|proposed\s+)?plan\b"),
        ("next steps", r"(?i)\bnext steps?\b"),
        (
            "proposed changes",
            r"(?i)\bproposed (?:changes|implementation|solution|approach)\b",
        ),
        ("would need to", r"(?i)\b(?:we|you|it) (?:would|will) need to\b"),
        ("numbered steps", r"(?im)^\s*[*_]*step\s+1\b"),
        (
            "let me plan",
            r"(?i)\blet me (?:first )?(?:plan|outline|propose|describe)\b",
        ),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanningDetection {
    /// Repository unchanged and planning language present.
    pub detected: bool,
    pub commit_changed: bool,
    pub working_tree_changed: bool,
    /// Labels of the indicators found in the text.
    pub planning_indicators: Vec<String>,
    /// One of the snapshots could not be taken; `detected` is then false.
    pub repository_status_unavailable: bool,
}

/// Labels of every planning indicator present in `text`.
pub fn planning_indicators(text: &str) -> Vec<String> {
    PLANNING_INDICATORS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Compare repository snapshots around an Implement phase.
///
/// Missing snapshots never produce a detection.
pub fn detect_planning_without_implementation(
    text: &str,
    before: Option<&RepoState>,
    after: Option<&RepoState>,
) -> PlanningDetection {
    let indicators = planning_indicators(text);

    let (Some(before), Some(after)) = (before, after) else {
        return PlanningDetection {
            planning_indicators: indicators,
            repository_status_unavailable: true,
            ..Default::default()
        };
    };

    let commit_changed = before.commit_hash != after.commit_hash;
    let working_tree_changed = before.has_changes != after.has_changes
        || before.status_output != after.status_output
        || before.diff_hash != after.diff_hash;

    PlanningDetection {
        detected: !commit_changed && !working_tree_changed && !indicators.is_empty(),
        commit_changed,
        working_tree_changed,
        planning_indicators: indicators,
        repository_status_unavailable: false,
    }
}
