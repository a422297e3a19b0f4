//! Parsing the implementer's report of which tasks it completed.
//!
//! The implementer is asked to finish with a section such as:
//!
//! ```text
//! Completed tasks:
//! - [x] Add the cache module
//! - Wire the cache into the CLI
//! ```

use regex::Regex;
use std::sync::LazyLock;

static COMPLETED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t#>*_-]*completed[ \t]+tasks?[*_]*[ \t]*:?[*_]*[ \t]*$").unwrap()
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]*(?:[-*+]|\d+[.)])[ \t]+(?:\[[ xX]\][ \t]+)?(.+?)[ \t]*$").unwrap()
});

/// Titles listed under the last `Completed tasks:` heading.
pub fn parse_completed_tasks(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let Some(start) = lines.iter().rposition(|l| COMPLETED_HEADING.is_match(l)) else {
        return Vec::new();
    };

    let mut titles = Vec::new();
    for line in &lines[start + 1..] {
        if line.trim().is_empty() {
            if titles.is_empty() {
                continue;
            }
            break;
        }
        match LIST_ITEM.captures(line).and_then(|c| c.get(1)) {
            Some(m) => {
                let title = clean_title(m.as_str());
                if !title.is_empty() {
                    titles.push(title);
                }
            }
            None => break,
        }
    }
    titles
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '*' || c == '_' || c == '`' || c == '"')
        .trim_end_matches('.')
        .trim()
        .to_string()
}

fn normalize(title: &str) -> String {
    clean_title(title)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keep only claimed titles that match a pending task, returning the plan's
/// own spelling of each, without duplicates, in claimed order.
pub fn match_pending_titles(claimed: &[String], pending: &[&str]) -> Vec<String> {
    let mut matched: Vec<String> = Vec::new();
    for claim in claimed {
        let key = normalize(claim);
        if let Some(title) = pending.iter().find(|p| normalize(p) == key) {
            if !matched.iter().any(|m| m == title) {
                matched.push(title.to_string());
            }
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bullets_and_checkboxes() {
        let text = "Work done.\n\nCompleted tasks:\n- [x] Add cache module\n* Wire CLI flag.\n1. `Document it`\n\nAnything else?";
        assert_eq!(
            parse_completed_tasks(text),
            vec!["Add cache module", "Wire CLI flag", "Document it"]
        );
    }

    #[test]
    fn test_heading_variants() {
        let text = "## Completed Tasks\n\n- One\n";
        assert_eq!(parse_completed_tasks(text), vec!["One"]);
        let text = "**Completed tasks:**\n- Two";
        assert_eq!(parse_completed_tasks(text), vec!["Two"]);
    }

    #[test]
    fn test_stops_at_non_list_line() {
        let text = "Completed tasks:\n- One\nThat is all.\n- Not a task";
        assert_eq!(parse_completed_tasks(text), vec!["One"]);
    }

    #[test]
    fn test_last_heading_wins() {
        let text = "Completed tasks:\n- Draft\n\nRevised.\n\nCompleted tasks:\n- Final";
        assert_eq!(parse_completed_tasks(text), vec!["Final"]);
    }

    #[test]
    fn test_no_heading_yields_nothing() {
        assert!(parse_completed_tasks("- Add cache module").is_empty());
    }

    #[test]
    fn test_match_pending_is_case_insensitive_and_filters() {
        let claimed = vec![
            "add CACHE module".to_string(),
            "Invented task".to_string(),
            "Add cache  module".to_string(),
        ];
        let pending = ["Add cache module", "Wire CLI flag"];
        assert_eq!(
            match_pending_titles(&claimed, &pending),
            vec!["Add cache module"]
        );
    }
}
