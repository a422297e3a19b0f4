use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the shell-execution tool whose rules are command prefixes.
pub const BASH_TOOL: &str = "Bash";

/// What an allow rule grants for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRule {
    /// Every use of the tool is approved.
    Always,
    /// Commands starting with one of these prefixes, checked in insertion order.
    Prefixes(Vec<String>),
}

/// Allow rules for one orchestrator process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowRuleSet {
    rules: BTreeMap<String, ToolRule>,
}

/// Rule set shared between the gateway and the backends.
pub type SharedAllowRules = Arc<RwLock<AllowRuleSet>>;

pub fn shared(rules: AllowRuleSet) -> SharedAllowRules {
    Arc::new(RwLock::new(rules))
}

impl AllowRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from settings entries (`"Tool"` or `"Bash(prefix:*)"`).
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for entry in entries {
            set.add_entry(entry.as_ref());
        }
        set
    }

    /// Add one settings entry. Unparseable entries are ignored.
    pub fn add_entry(&mut self, entry: &str) -> bool {
        match parse_entry(entry) {
            Some((tool, Some(prefix))) => self.allow_prefix(&tool, &prefix),
            Some((tool, None)) => self.allow_tool(&tool),
            None => {
                tracing::debug!(entry, "Ignoring unrecognised allow entry");
                false
            }
        }
    }

    pub fn is_always_allowed(&self, tool: &str) -> bool {
        matches!(self.rules.get(tool), Some(ToolRule::Always))
    }

    /// First registered prefix that `command` starts with.
    pub fn matching_prefix(&self, tool: &str, command: &str) -> Option<&str> {
        match self.rules.get(tool) {
            Some(ToolRule::Prefixes(prefixes)) => prefixes
                .iter()
                .find(|p| command.starts_with(p.as_str()))
                .map(String::as_str),
            _ => None,
        }
    }

    /// Whether a rule covers this use of `tool`, by name or by command prefix.
    pub fn covers(&self, tool: &str, command: Option<&str>) -> bool {
        self.is_always_allowed(tool)
            || command.is_some_and(|cmd| self.matching_prefix(tool, cmd).is_some())
    }

    /// Always allow `tool`. Returns whether the set changed.
    pub fn allow_tool(&mut self, tool: &str) -> bool {
        let tool = tool.trim();
        if tool.is_empty() || self.is_always_allowed(tool) {
            return false;
        }
        self.rules.insert(tool.to_string(), ToolRule::Always);
        true
    }

    /// Allow commands of `tool` starting with `prefix`. Duplicates are
    /// ignored, as are prefixes for a tool that is already always allowed.
    pub fn allow_prefix(&mut self, tool: &str, prefix: &str) -> bool {
        let tool = tool.trim();
        if tool.is_empty() || prefix.is_empty() {
            return false;
        }
        let rule = self
            .rules
            .entry(tool.to_string())
            .or_insert_with(|| ToolRule::Prefixes(Vec::new()));
        match rule {
            ToolRule::Always => false,
            ToolRule::Prefixes(prefixes) => {
                if prefixes.iter().any(|p| p == prefix) {
                    false
                } else {
                    prefixes.push(prefix.to_string());
                    true
                }
            }
        }
    }

    pub fn merge(&mut self, other: &AllowRuleSet) {
        for entry in other.to_entries() {
            self.add_entry(&entry);
        }
    }

    /// Settings entries for every rule, tools in name order.
    pub fn to_entries(&self) -> Vec<String> {
        let mut entries = Vec::new();
        for (tool, rule) in &self.rules {
            match rule {
                ToolRule::Always => entries.push(tool.clone()),
                ToolRule::Prefixes(prefixes) => {
                    entries.extend(prefixes.iter().map(|p| format_entry(tool, Some(p))))
                }
            }
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Parse `"Tool"` or `"Tool(prefix:*)"`.
pub fn parse_entry(entry: &str) -> Option<(String, Option<String>)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    match entry.find('(') {
        None => {
            let valid = entry.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
            valid.then(|| (entry.to_string(), None))
        }
        Some(open) => {
            let tool = entry[..open].trim();
            let inner = entry[open + 1..].strip_suffix(')')?;
            if tool.is_empty() {
                return None;
            }
            match inner.strip_suffix(":*") {
                Some(prefix) if !prefix.is_empty() => {
                    Some((tool.to_string(), Some(prefix.to_string())))
                }
                // `Tool(*)` is another spelling of an unconditional allow.
                _ if inner == "*" => Some((tool.to_string(), None)),
                _ => None,
            }
        }
    }
}

pub fn format_entry(tool: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(prefix) => format!("{}({}:*)", tool, prefix),
        None => tool.to_string(),
    }
}

/// Candidate prefixes offered for a Bash command: each progressively longer
/// run of leading words, ending with the full command. Candidates are literal
/// slices of the command so they match it with `starts_with`.
pub fn prefix_candidates(command: &str) -> Vec<String> {
    let command = command.trim();
    let mut candidates = Vec::new();
    let mut in_word = false;
    for (i, ch) in command.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                candidates.push(command[..i].to_string());
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    if !command.is_empty() {
        candidates.push(command.to_string());
    }
    candidates
}
