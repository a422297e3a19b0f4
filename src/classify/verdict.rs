use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static EXPLICIT_VERDICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bverdict\b[*_]*[ \t]*[:=-]?[ \t]*[*_`]*[ \t]*(ACCEPTABLE|NEEDS[_ ]FIXES)\b").unwrap()
});

static BARE_VERDICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(ACCEPTABLE|NEEDS_FIXES)\b").unwrap());

/// The reviewer's terminal judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Acceptable,
    NeedsFixes,
    Unknown,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Acceptable => write!(f, "ACCEPTABLE"),
            Verdict::NeedsFixes => write!(f, "NEEDS_FIXES"),
            Verdict::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl Verdict {
    fn from_token(token: &str) -> Self {
        if token.to_uppercase().starts_with("ACCEPTABLE") {
            Verdict::Acceptable
        } else {
            Verdict::NeedsFixes
        }
    }
}

/// Parse the verdict token from review text.
///
/// An explicit `Verdict: X` line wins; otherwise the last uppercase
/// `ACCEPTABLE` / `NEEDS_FIXES` token counts, since reviewers put the
/// verdict at the end.
pub fn parse_verdict(text: &str) -> Verdict {
    if let Some(token) = EXPLICIT_VERDICT
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .last()
    {
        return Verdict::from_token(token.as_str());
    }
    BARE_VERDICT
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .last()
        .map(|m| Verdict::from_token(m.as_str()))
        .unwrap_or(Verdict::Unknown)
}
