use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::errors::{AgentError, TimeoutKind};
use crate::orchestrator::TrackedFiles;
use crate::stream::{FoldOutcome, LineFold, truncate_str};
use crate::ui::OrchestratorUI;

const STDERR_GRACE: Duration = Duration::from_secs(1);
const STDERR_LIMIT: usize = 2000;

/// The two process timeout tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Limit on waiting for the first line of output.
    pub initial: Duration,
    /// Limit on silence once output has started; reset by every line.
    pub inactivity: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(120),
            inactivity: Duration::from_secs(1800),
        }
    }
}

impl Timeouts {
    pub fn from_secs(initial: u64, inactivity: u64) -> Self {
        Self {
            initial: Duration::from_secs(initial),
            inactivity: Duration::from_secs(inactivity),
        }
    }
}

/// One process to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Written to stdin, which is then closed.
    pub stdin: String,
}

impl ProcessSpec {
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Run `spec` to completion, folding every stdout line into `fold`.
///
/// Touched paths are pushed into `tracked` as soon as they appear so the
/// permission gateway sees them while the process is still running.
pub async fn run_streaming<F: LineFold>(
    spec: &ProcessSpec,
    fold: F,
    timeouts: Timeouts,
    tracked: &TrackedFiles,
    ui: Option<Arc<OrchestratorUI>>,
) -> Result<FoldOutcome, AgentError> {
    tracing::debug!(command = %spec.display(), work_dir = %spec.work_dir.display(), "Spawning agent");

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| AgentError::SpawnFailed {
            command: spec.program.clone(),
            source,
        })?;

    // The prompt is fed from its own task so a child that never drains stdin
    // still falls under the read timeouts below.
    let stdin_task = child.stdin.take().map(|mut stdin| {
        let prompt = spec.stdin.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                tracing::debug!(error = %e, "Agent closed stdin early");
            }
            let _ = stdin.shutdown().await;
        })
    });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::Io(std::io::Error::other("agent stdout was not captured")))?;
    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        })
    });

    let start = Instant::now();
    let elapsed_task = ui.clone().map(|ui| {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                ui.update_elapsed(start.elapsed());
            }
        })
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut state = fold;
    let mut seen_output = false;
    let mut known_paths = 0;

    let timed_out = loop {
        let (window, kind) = if seen_output {
            (timeouts.inactivity, TimeoutKind::Inactivity)
        } else {
            (timeouts.initial, TimeoutKind::Initial)
        };
        match tokio::time::timeout(window, lines.next_line()).await {
            Err(_) => break Some((kind, window)),
            Ok(Ok(Some(line))) => {
                seen_output = true;
                if line.trim().is_empty() {
                    continue;
                }
                state = state.fold(&line);
                let touched = state.touched_paths();
                if touched.len() != known_paths {
                    known_paths = touched.len();
                    tracked.extend(touched.iter().cloned());
                }
                if let (Some(ui), Some(activity)) = (&ui, state.last_activity()) {
                    ui.update_activity(activity);
                }
            }
            Ok(Ok(None)) => break None,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed reading agent output; treating as end of stream");
                break None;
            }
        }
    };

    if let Some(task) = elapsed_task {
        task.abort();
    }

    // Closing stdout does not end the process; bound the wait the same way.
    let waited = match timed_out {
        Some(expired) => Err(expired),
        None => match tokio::time::timeout(timeouts.inactivity, child.wait()).await {
            Ok(status) => Ok(status),
            Err(_) => Err((TimeoutKind::Inactivity, timeouts.inactivity)),
        },
    };

    if let Some(task) = stdin_task {
        task.abort();
    }

    let status = match waited {
        Ok(status) => status?,
        Err((kind, after)) => {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Agent already exited when killed");
            }
            if let Some(task) = stderr_task {
                task.abort();
            }
            if state.result_seen() {
                tracing::warn!(
                    %kind,
                    secs = after.as_secs(),
                    "Agent hit the timeout after producing a result; treating as complete"
                );
                return Ok(state.finish());
            }
            return Err(AgentError::Timeout { kind, after });
        }
    };

    let stderr = match stderr_task {
        Some(task) => match tokio::time::timeout(STDERR_GRACE, task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        },
        None => String::new(),
    };

    tracing::debug!(
        exit_code = status.code().unwrap_or(-1),
        elapsed_secs = start.elapsed().as_secs(),
        "Agent exited"
    );

    if !status.success() {
        let exit_code = status.code().unwrap_or(-1);
        if state.result_seen() {
            tracing::warn!(exit_code, "Agent exited non-zero after producing a result");
        } else {
            return Err(AgentError::ProcessFailed {
                exit_code,
                stderr: truncate_str(stderr.trim(), STDERR_LIMIT),
            });
        }
    }

    Ok(state.finish())
}
