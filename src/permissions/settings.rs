//! Persistence of allow rules.
//!
//! Two files share one JSON shape:
//!
//! ```json
//! { "permissions": { "allow": ["Read", "Bash(cargo test:*)"], "deny": [] } }
//! ```
//!
//! - the workspace settings file (`.claude/settings.local.json` by default)
//! - the shared store, `<config dir>/anvil/shared-permissions/<repo id>.json`,
//!   which carries "always allow" decisions across checkouts of one repository.
//!
//! Writes are read-merge-write under an advisory lock on a sibling `.lock`
//! file; keys anvil does not know are preserved.

use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::rules::AllowRuleSet;
use crate::errors::PermissionError;
use crate::util::write_atomic;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// Allow and deny entries read from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionLists {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

struct FileLock {
    file: std::fs::File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// One JSON permission file.
#[derive(Debug, Clone)]
pub struct PermissionFile {
    path: PathBuf,
}

impl PermissionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_err(&self, message: impl std::fmt::Display) -> PermissionError {
        PermissionError::Persist {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    fn lock(&self) -> Result<FileLock, PermissionError> {
        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.persist_err(e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| self.persist_err(e))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(FileLock { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(self.persist_err(format!(
                            "timed out waiting for lock ({}s)",
                            LOCK_TIMEOUT.as_secs()
                        )));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(err) => return Err(self.persist_err(err)),
            }
        }
    }

    fn read_document(&self) -> Result<Value, PermissionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Value::Object(Map::new())),
            Ok(content) => serde_json::from_str(&content).map_err(|e| self.persist_err(e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Value::Object(Map::new())),
            Err(e) => Err(self.persist_err(e)),
        }
    }

    /// Read both lists. A missing file is empty.
    pub fn load(&self) -> Result<PermissionLists, PermissionError> {
        let doc = self.read_document()?;
        let list = |key: &str| -> Vec<String> {
            doc.get("permissions")
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(PermissionLists {
            allow: list("allow"),
            deny: list("deny"),
        })
    }

    /// Append `entry` to `permissions.allow` unless already present.
    /// Returns whether the file changed.
    pub fn add_allow(&self, entry: &str) -> Result<bool, PermissionError> {
        let _lock = self.lock()?;
        let mut doc = self.read_document()?;

        let root = doc
            .as_object_mut()
            .ok_or_else(|| self.persist_err("top-level value is not an object"))?;
        let permissions = root
            .entry("permissions")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| self.persist_err("`permissions` is not an object"))?;
        let allow = permissions
            .entry("allow")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| self.persist_err("`permissions.allow` is not an array"))?;

        if allow.iter().any(|v| v.as_str() == Some(entry)) {
            return Ok(false);
        }
        allow.push(Value::String(entry.to_string()));

        let mut content = serde_json::to_string_pretty(&doc).map_err(|e| self.persist_err(e))?;
        content.push('\n');
        write_atomic(&self.path, &content).map_err(|e| self.persist_err(format!("{:#}", e)))?;
        Ok(true)
    }
}

/// File name for a repository identity such as `github.com/acme/widget`.
fn store_file_name(identity: &str) -> String {
    let sanitized: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", sanitized)
}

/// Shared store location under `base`.
pub fn shared_store_path_in(base: &Path, identity: &str) -> PathBuf {
    base.join("anvil")
        .join("shared-permissions")
        .join(store_file_name(identity))
}

/// Shared store location under the user's config directory.
pub fn shared_store_path(identity: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|base| shared_store_path_in(&base, identity))
}

/// Settings file plus optional shared store.
#[derive(Debug, Clone)]
pub struct PermissionPersistence {
    settings: PermissionFile,
    shared: Option<PermissionFile>,
}

impl PermissionPersistence {
    pub fn new(settings: PermissionFile, shared: Option<PermissionFile>) -> Self {
        Self { settings, shared }
    }

    pub fn settings(&self) -> &PermissionFile {
        &self.settings
    }

    pub fn shared(&self) -> Option<&PermissionFile> {
        self.shared.as_ref()
    }

    /// Allow rules from both files. Unreadable files are logged and skipped.
    pub fn load_rules(&self) -> AllowRuleSet {
        let mut rules = AllowRuleSet::new();
        for file in std::iter::once(&self.settings).chain(self.shared.iter()) {
            match file.load() {
                Ok(lists) => rules.merge(&AllowRuleSet::from_entries(&lists.allow)),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable permission file"),
            }
        }
        rules
    }

    /// Tool names denied by the settings file.
    pub fn load_denied(&self) -> Vec<String> {
        match self.settings.load() {
            Ok(lists) => lists.deny,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read denied tools");
                Vec::new()
            }
        }
    }

    /// Persist an "always allow" entry.
    ///
    /// The settings file write is reported; the shared store write is best
    /// effort and only logged.
    pub fn persist_allow(&self, entry: &str) -> Result<(), PermissionError> {
        if let Some(shared) = &self.shared
            && let Err(e) = shared.add_allow(entry)
        {
            tracing::warn!(error = %e, entry, "Failed to update shared permission store");
        }
        let changed = self.settings.add_allow(entry)?;
        tracing::debug!(entry, changed, path = %self.settings.path().display(), "Persisted allow rule");
        Ok(())
    }
}
