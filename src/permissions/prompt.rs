//! Interactive approval of tool requests.
//!
//! A prompt may be raced against a timeout. The losing side is always
//! resolved: when the timeout wins, the prompt's cancellation token is
//! triggered and the prompt is awaited until it has restored the terminal.

use async_trait::async_trait;
use console::{Term, style};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::protocol::PermissionRequest;
use super::rules::{BASH_TOOL, prefix_candidates};
use crate::errors::PermissionError;
use crate::stream::truncate_str;
use crate::ui::OrchestratorUI;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The operator's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionChoice {
    AllowOnce,
    /// Allow for the rest of this process. `prefix` applies to Bash only.
    AllowSession { prefix: Option<String> },
    /// Allow and persist the rule. `prefix` applies to Bash only.
    AlwaysAllow { prefix: Option<String> },
    Disallow,
}

impl PermissionChoice {
    pub fn approves(&self) -> bool {
        !matches!(self, PermissionChoice::Disallow)
    }
}

/// What the operator is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub tool_name: String,
    pub summary: String,
    /// Bash prefixes offered for session/always rules, shortest first.
    pub prefix_candidates: Vec<String>,
}

impl PromptRequest {
    pub fn from_request(request: &PermissionRequest) -> Self {
        let command = request.command().filter(|_| request.tool_name == BASH_TOOL);
        let summary = match command {
            Some(cmd) => cmd.to_string(),
            None => request
                .input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| truncate_str(&request.input.to_string(), 200)),
        };
        Self {
            tool_name: request.tool_name.clone(),
            summary,
            prefix_candidates: command.map(prefix_candidates).unwrap_or_default(),
        }
    }
}

#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    /// Ask the operator. Must return promptly once `cancel` fires.
    async fn prompt(
        &self,
        request: &PromptRequest,
        cancel: CancellationToken,
    ) -> Result<PermissionChoice, PermissionError>;
}

#[derive(Debug)]
pub enum PromptOutcome {
    Answered(PermissionChoice),
    TimedOut,
    Failed(PermissionError),
}

/// Race a prompt against an optional timeout. `cancel` also ends the prompt
/// early, e.g. when the gateway shuts down.
pub async fn prompt_with_timeout(
    prompter: &dyn PermissionPrompter,
    request: &PromptRequest,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) -> PromptOutcome {
    let prompt = prompter.prompt(request, cancel.clone());
    tokio::pin!(prompt);

    let answered = match timeout {
        None => prompt.await,
        Some(limit) => {
            tokio::select! {
                result = &mut prompt => result,
                _ = tokio::time::sleep(limit) => {
                    cancel.cancel();
                    if let Err(e) = prompt.await {
                        tracing::debug!(error = %e, "Prompt ended after cancellation");
                    }
                    return PromptOutcome::TimedOut;
                }
            }
        }
    };

    match answered {
        Ok(choice) => PromptOutcome::Answered(choice),
        Err(e) => PromptOutcome::Failed(e),
    }
}

/// Prompt on the controlling terminal with single-key answers.
#[derive(Default, Clone)]
pub struct TerminalPrompter {
    ui: Option<Arc<OrchestratorUI>>,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide the progress display while a prompt is on screen.
    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }
}

#[async_trait]
impl PermissionPrompter for TerminalPrompter {
    async fn prompt(
        &self,
        request: &PromptRequest,
        cancel: CancellationToken,
    ) -> Result<PermissionChoice, PermissionError> {
        let request = request.clone();
        let ui = self.ui.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(ui) = &ui {
                ui.pause();
            }
            let result = run_terminal_prompt(&request, &cancel);
            if let Some(ui) = &ui {
                ui.resume();
            }
            result
        })
        .await
        .map_err(|e| PermissionError::Prompt(e.to_string()))?
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self, PermissionError> {
        enable_raw_mode().map_err(|e| PermissionError::Prompt(e.to_string()))?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn wait_key(cancel: &CancellationToken) -> Result<KeyEvent, PermissionError> {
    let _raw = RawModeGuard::enable()?;
    loop {
        if cancel.is_cancelled() {
            return Err(PermissionError::Prompt("prompt cancelled".into()));
        }
        let ready = event::poll(POLL_INTERVAL).map_err(|e| PermissionError::Prompt(e.to_string()))?;
        if !ready {
            continue;
        }
        if let Event::Key(key) = event::read().map_err(|e| PermissionError::Prompt(e.to_string()))?
            && key.kind == KeyEventKind::Press
        {
            return Ok(key);
        }
    }
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
}

fn run_terminal_prompt(
    request: &PromptRequest,
    cancel: &CancellationToken,
) -> Result<PermissionChoice, PermissionError> {
    if !std::io::stdin().is_terminal() {
        return Err(PermissionError::Prompt("stdin is not a terminal".into()));
    }
    let term = Term::stderr();
    let io = |e: std::io::Error| PermissionError::Prompt(e.to_string());

    term.write_line("").map_err(io)?;
    term.write_line(&format!(
        "{} {} wants to run:",
        style("?").yellow().bold(),
        style(&request.tool_name).cyan().bold()
    ))
    .map_err(io)?;
    term.write_line(&format!("    {}", style(&request.summary).dim()))
        .map_err(io)?;
    term.write_line(&format!(
        "  {} Allow once   {} Allow for session   {} Always allow   {} Disallow",
        style("[1]").bold(),
        style("[2]").bold(),
        style("[3]").bold(),
        style("[4]").bold()
    ))
    .map_err(io)?;

    let choice = loop {
        let key = wait_key(cancel)?;
        if is_interrupt(&key) {
            break PermissionChoice::Disallow;
        }
        match key.code {
            KeyCode::Char('1') | KeyCode::Char('y') => break PermissionChoice::AllowOnce,
            KeyCode::Char('2') | KeyCode::Char('s') => {
                break PermissionChoice::AllowSession {
                    prefix: choose_prefix(&term, request, cancel)?,
                };
            }
            KeyCode::Char('3') | KeyCode::Char('a') => {
                break PermissionChoice::AlwaysAllow {
                    prefix: choose_prefix(&term, request, cancel)?,
                };
            }
            KeyCode::Char('4') | KeyCode::Char('n') | KeyCode::Esc => {
                break PermissionChoice::Disallow;
            }
            _ => {}
        }
    };

    let label = match &choice {
        PermissionChoice::AllowOnce => style("allowed once").green(),
        PermissionChoice::AllowSession { .. } => style("allowed for session").green(),
        PermissionChoice::AlwaysAllow { .. } => style("always allowed").green(),
        PermissionChoice::Disallow => style("disallowed").red(),
    };
    term.write_line(&format!("  → {}", label)).map_err(io)?;
    Ok(choice)
}

/// Pick the prefix a Bash rule should cover. Other tools get `None`.
fn choose_prefix(
    term: &Term,
    request: &PromptRequest,
    cancel: &CancellationToken,
) -> Result<Option<String>, PermissionError> {
    let candidates = &request.prefix_candidates;
    if request.tool_name != BASH_TOOL || candidates.is_empty() {
        return Ok(None);
    }
    let io = |e: std::io::Error| PermissionError::Prompt(e.to_string());
    let shown: Vec<&String> = candidates.iter().take(9).collect();
    term.write_line("  Allow commands starting with:").map_err(io)?;
    for (i, candidate) in shown.iter().enumerate() {
        term.write_line(&format!("    {} {}", style(format!("[{}]", i + 1)).bold(), candidate))
            .map_err(io)?;
    }
    term.write_line(&format!("  {} full command", style("[Enter]").bold()))
        .map_err(io)?;

    let full = candidates.last().cloned();
    loop {
        let key = wait_key(cancel)?;
        if is_interrupt(&key) {
            return Ok(full);
        }
        match key.code {
            KeyCode::Enter | KeyCode::Esc => return Ok(full),
            KeyCode::Char(c) => {
                if let Some(idx) = c.to_digit(10).map(|d| d as usize)
                    && (1..=shown.len()).contains(&idx)
                {
                    return Ok(Some(shown[idx - 1].clone()));
                }
            }
            _ => {}
        }
    }
}
