use std::collections::BTreeSet;
use std::path::PathBuf;

/// What an agent run amounted to once its output stream closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    /// The agent's final textual message.
    pub final_message: String,
    /// Error text reported by the agent itself (an error result event).
    pub failure_message: Option<String>,
    /// Absolute paths the agent reported creating or editing.
    pub touched_paths: BTreeSet<PathBuf>,
}

/// A pure reduction over an agent's stdout lines.
///
/// Implementors take ownership of the prior state and return the next one, so
/// the process driver never shares mutable state with the parser.
pub trait LineFold: Send + Sized {
    /// Fold one line of output into the state.
    fn fold(self, line: &str) -> Self;

    /// Whether a terminal result event has been observed.
    fn result_seen(&self) -> bool;

    /// Paths touched so far.
    fn touched_paths(&self) -> &BTreeSet<PathBuf>;

    /// Short description of the most recent activity, for progress display.
    fn last_activity(&self) -> Option<&str> {
        None
    }

    fn finish(self) -> FoldOutcome;
}

/// Fold every line of `text` in order. Used by tests and offline replays.
pub fn fold_all<F: LineFold>(initial: F, text: &str) -> F {
    text.lines().fold(initial, |state, line| state.fold(line))
}
