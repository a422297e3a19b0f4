//! Detection of the FAILED protocol.
//!
//! An agent that cannot proceed writes a line starting with `FAILED:`
//! (optionally tagged with its role, `FAILED (tester):`), followed by
//! optional `Requirements`, `Problems` and `Solutions` sections:
//!
//! ```text
//! FAILED: cannot build the workspace
//!
//! Requirements:
//! The crate must compile before tests can be written.
//!
//! Problems:
//! `libssl` is missing from the environment.
//!
//! Possible solutions:
//! Install openssl headers or switch to rustls.
//! ```

use regex::Regex;
use std::sync::LazyLock;

use crate::orchestrator::{FailureDetails, Role};

static FAILED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t>*_#-]*FAILED(?:[ \t]*\([ \t]*([A-Za-z]+)[ \t]*\))?[*_]*:[*_]*[ \t]*(.*)$")
        .unwrap()
});

static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[ \t>#*_-]*(requirements|problems|(?:possible[ \t]+)?solutions)[*_]*[ \t]*(?::[*_]*[ \t]*(.*)|[*_]*[ \t]*$)",
    )
    .unwrap()
});

static ROLE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#+[ \t]*|\[)?(implementer|tester|verifier|reviewer|fixer|implementation|testing|verification|review|fixes)\b",
    )
    .unwrap()
});

/// Structured sections following a FAILED marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSections {
    pub requirements: String,
    pub problems: String,
    pub solutions: Option<String>,
}

/// Result of scanning agent output for the FAILED protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    pub failed: bool,
    pub summary: Option<String>,
    pub details: Option<FailureSections>,
    /// Role named inside the marker, e.g. `FAILED (tester):`.
    pub tagged_role: Option<Role>,
}

impl FailureReport {
    /// Convert into the reporting shape, attributing it to `source_agent`.
    pub fn into_details(self, source_agent: Role) -> FailureDetails {
        let summary = self
            .summary
            .unwrap_or_else(|| format!("The {} reported a failure", source_agent));
        let sections = self.details.unwrap_or_default();
        FailureDetails {
            requirements: non_empty_or(sections.requirements, "Not stated by the agent"),
            problems: non_empty_or(sections.problems, &summary),
            solutions: sections.solutions.filter(|s| !s.trim().is_empty()),
            source_agent,
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[derive(Clone, Copy)]
enum Section {
    Requirements,
    Problems,
    Solutions,
}

/// Scan the whole text for a line-anchored `FAILED:` marker.
pub fn parse_failure(text: &str) -> FailureReport {
    let Some(caps) = FAILED_MARKER.captures(text) else {
        return FailureReport::default();
    };

    let tagged_role = caps.get(1).and_then(|m| m.as_str().parse::<Role>().ok());
    let marker_end = caps.get(0).map(|m| m.end()).unwrap_or(0);
    let tail = &text[marker_end..];

    let inline = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    let summary = if inline.is_empty() {
        tail.lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !SECTION_HEADING.is_match(l))
            .map(str::to_string)
    } else {
        Some(inline.to_string())
    };

    FailureReport {
        failed: true,
        summary,
        details: parse_sections(tail),
        tagged_role,
    }
}

fn parse_sections(text: &str) -> Option<FailureSections> {
    let mut sections = FailureSections::default();
    let mut solutions = String::new();
    let mut current: Option<Section> = None;
    let mut found = false;

    for line in text.lines() {
        if let Some(caps) = SECTION_HEADING.captures(line) {
            let label = caps
                .get(1)
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_default();
            current = Some(if label.starts_with("requirements") {
                Section::Requirements
            } else if label.starts_with("problems") {
                Section::Problems
            } else {
                Section::Solutions
            });
            found = true;
            if let Some(inline) = caps.get(2).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()) {
                append_line(section_buf(&mut sections, &mut solutions, current), inline);
            }
            continue;
        }
        if current.is_some() {
            append_line(section_buf(&mut sections, &mut solutions, current), line);
        }
    }

    if !found {
        return None;
    }
    sections.requirements = sections.requirements.trim().to_string();
    sections.problems = sections.problems.trim().to_string();
    let solutions = solutions.trim();
    sections.solutions = (!solutions.is_empty()).then(|| solutions.to_string());
    Some(sections)
}

fn section_buf<'a>(
    sections: &'a mut FailureSections,
    solutions: &'a mut String,
    current: Option<Section>,
) -> &'a mut String {
    match current {
        Some(Section::Requirements) | None => &mut sections.requirements,
        Some(Section::Problems) => &mut sections.problems,
        Some(Section::Solutions) => solutions,
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

/// Work out which role produced a FAILED marker in combined output.
///
/// Uses the role tag inside the marker when present, otherwise the nearest
/// role heading (`## Testing`, `[tester]`, `Reviewer:` ...) above the marker.
pub fn infer_source_role(text: &str) -> Option<Role> {
    let caps = FAILED_MARKER.captures(text)?;
    if let Some(role) = caps.get(1).and_then(|m| m.as_str().parse::<Role>().ok()) {
        return Some(role);
    }
    let marker_start = caps.get(0).map(|m| m.start()).unwrap_or(0);
    ROLE_HEADING
        .captures_iter(&text[..marker_start])
        .filter_map(|c| c.get(1))
        .last()
        .and_then(|m| role_for_heading(&m.as_str().to_lowercase()))
}

fn role_for_heading(heading: &str) -> Option<Role> {
    match heading {
        "implementation" => Some(Role::Implementer),
        "testing" => Some(Role::Tester),
        "verification" => Some(Role::Verifier),
        "review" => Some(Role::Reviewer),
        "fixes" => Some(Role::Fixer),
        other => other.parse().ok(),
    }
}
