//! Unix-socket permission gateway.
//!
//! One gateway value lives for the whole process and owns the prompt lock and
//! the shared allow rules. [`PermissionGateway::start`] opens a socket for one
//! orchestration run and returns a [`GatewayHandle`]; dropping or closing the
//! handle stops the listener and removes its temporary directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::prompt::{
    PermissionChoice, PermissionPrompter, PromptOutcome, PromptRequest, prompt_with_timeout,
};
use super::protocol::{GatewayMessage, PermissionRequest, PermissionResponse};
use super::rm::parse_rm_command;
use super::rules::{AllowRuleSet, BASH_TOOL, SharedAllowRules, format_entry};
use super::settings::PermissionPersistence;
use crate::anvil_config::DefaultResponse;
use crate::errors::PermissionError;
use crate::orchestrator::TrackedFiles;

const SOCKET_NAME: &str = "permissions.sock";

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// `None` waits for the operator indefinitely.
    pub prompt_timeout: Option<Duration>,
    pub default_response: DefaultResponse,
    pub auto_approve_tracked_deletes: bool,
    /// Rules that are denied without prompting (same syntax as allow rules).
    pub denied: AllowRuleSet,
}

/// How one request was decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Denied,
    AlwaysAllowed,
    PrefixMatch(String),
    TrackedCleanup,
    Prompted(PermissionChoice),
    /// The prompt timed out; carries the default decision.
    PromptTimedOut(bool),
    /// The prompt could not be shown; carries the default decision.
    PromptFailed(bool),
}

impl Resolution {
    pub fn approved(&self) -> bool {
        match self {
            Resolution::Denied => false,
            Resolution::AlwaysAllowed | Resolution::PrefixMatch(_) | Resolution::TrackedCleanup => {
                true
            }
            Resolution::Prompted(choice) => choice.approves(),
            Resolution::PromptTimedOut(approved) | Resolution::PromptFailed(approved) => *approved,
        }
    }
}

/// Per-invocation state: where the agent runs, what it has touched, and the
/// decision for every request id seen so far.
pub struct GatewaySession {
    work_dir: PathBuf,
    tracked: TrackedFiles,
    shutdown: CancellationToken,
    decisions: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
}

impl GatewaySession {
    pub fn new(work_dir: impl Into<PathBuf>, tracked: TrackedFiles) -> Self {
        Self {
            work_dir: work_dir.into(),
            tracked,
            shutdown: CancellationToken::new(),
            decisions: Mutex::new(HashMap::new()),
        }
    }
}

pub struct PermissionGateway {
    rules: SharedAllowRules,
    persistence: Option<Arc<PermissionPersistence>>,
    prompter: Arc<dyn PermissionPrompter>,
    config: GatewayConfig,
    prompt_lock: Mutex<()>,
    prompts_shown: AtomicUsize,
}

impl PermissionGateway {
    pub fn new(
        rules: SharedAllowRules,
        prompter: Arc<dyn PermissionPrompter>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            rules,
            persistence: None,
            prompter,
            config,
            prompt_lock: Mutex::new(()),
            prompts_shown: AtomicUsize::new(0),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<PermissionPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn rules(&self) -> &SharedAllowRules {
        &self.rules
    }

    /// Number of interactive prompts shown so far.
    pub fn prompts_shown(&self) -> usize {
        self.prompts_shown.load(Ordering::SeqCst)
    }

    fn default_approves(&self) -> bool {
        self.config.default_response.approves()
    }

    /// Decide without asking anyone, if a rule applies.
    async fn resolve_by_rules(
        &self,
        request: &PermissionRequest,
        session: &GatewaySession,
    ) -> Option<Resolution> {
        let tool = request.tool_name.as_str();
        let command = request.command().filter(|_| tool == BASH_TOOL);

        if self.config.denied.covers(tool, command) {
            return Some(Resolution::Denied);
        }

        {
            let rules = self.rules.read().await;
            if rules.is_always_allowed(tool) {
                return Some(Resolution::AlwaysAllowed);
            }
            if let Some(cmd) = command
                && let Some(prefix) = rules.matching_prefix(tool, cmd)
            {
                return Some(Resolution::PrefixMatch(prefix.to_string()));
            }
        }

        if self.config.auto_approve_tracked_deletes
            && let Some(cmd) = command
        {
            let targets = parse_rm_command(cmd, &session.work_dir);
            if session.tracked.contains_all(&targets) {
                return Some(Resolution::TrackedCleanup);
            }
        }

        None
    }

    /// Resolve one request, prompting the operator if no rule applies.
    pub async fn resolve(
        &self,
        request: &PermissionRequest,
        session: &GatewaySession,
    ) -> Resolution {
        if let Some(resolution) = self.resolve_by_rules(request, session).await {
            return resolution;
        }

        // One prompt on screen at a time. A decision made while waiting may
        // have added a rule that now covers this request.
        let _prompt_guard = self.prompt_lock.lock().await;
        if let Some(resolution) = self.resolve_by_rules(request, session).await {
            return resolution;
        }

        self.prompts_shown.fetch_add(1, Ordering::SeqCst);
        let prompt_request = PromptRequest::from_request(request);
        let outcome = prompt_with_timeout(
            self.prompter.as_ref(),
            &prompt_request,
            self.config.prompt_timeout,
            session.shutdown.child_token(),
        )
        .await;

        match outcome {
            PromptOutcome::Answered(choice) => {
                self.apply_choice(request, &choice).await;
                Resolution::Prompted(choice)
            }
            PromptOutcome::TimedOut => {
                tracing::warn!(
                    tool = %request.tool_name,
                    default = %self.config.default_response,
                    "Permission prompt timed out; applying default"
                );
                Resolution::PromptTimedOut(self.default_approves())
            }
            PromptOutcome::Failed(e) => {
                tracing::warn!(
                    tool = %request.tool_name,
                    error = %e,
                    default = %self.config.default_response,
                    "Permission prompt unavailable; applying default"
                );
                Resolution::PromptFailed(self.default_approves())
            }
        }
    }

    /// Rule entry a session/always choice creates. Bash rules are always
    /// prefix rules; without a chosen prefix the whole command is used.
    fn entry_for(request: &PermissionRequest, prefix: Option<&str>) -> String {
        if request.tool_name == BASH_TOOL {
            let prefix = prefix
                .map(str::to_string)
                .or_else(|| request.command().map(|c| c.trim().to_string()))
                .filter(|p| !p.is_empty());
            if let Some(prefix) = prefix {
                return format_entry(BASH_TOOL, Some(&prefix));
            }
        }
        format_entry(&request.tool_name, None)
    }

    async fn apply_choice(&self, request: &PermissionRequest, choice: &PermissionChoice) {
        let (prefix, persist) = match choice {
            PermissionChoice::AllowSession { prefix } => (prefix.as_deref(), false),
            PermissionChoice::AlwaysAllow { prefix } => (prefix.as_deref(), true),
            PermissionChoice::AllowOnce | PermissionChoice::Disallow => return,
        };
        let entry = Self::entry_for(request, prefix);
        self.rules.write().await.add_entry(&entry);
        tracing::info!(rule = %entry, persist, "Added allow rule");

        if persist && let Some(persistence) = self.persistence.clone() {
            let entry_for_write = entry.clone();
            let result =
                tokio::task::spawn_blocking(move || persistence.persist_allow(&entry_for_write))
                    .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, rule = %entry, "Failed to persist allow rule"),
                Err(e) => tracing::warn!(error = %e, rule = %entry, "Persist task failed"),
            }
        }
    }

    /// Decide a request exactly once per request id within a session.
    pub async fn decide(&self, request: &PermissionRequest, session: &GatewaySession) -> bool {
        let cell = {
            let mut decisions = session.decisions.lock().await;
            decisions
                .entry(request.request_id.clone())
                .or_default()
                .clone()
        };
        *cell
            .get_or_init(|| async {
                let resolution = self.resolve(request, session).await;
                tracing::debug!(
                    request_id = %request.request_id,
                    tool = %request.tool_name,
                    ?resolution,
                    "Permission resolved"
                );
                resolution.approved()
            })
            .await
    }

    /// Open the socket for one orchestration run. Every phase of the run
    /// connects to it; the handle closes it when dropped.
    pub async fn start(
        self: &Arc<Self>,
        work_dir: &Path,
        tracked: TrackedFiles,
    ) -> Result<GatewayHandle, PermissionError> {
        let dir = tempfile::Builder::new().prefix("anvil-perm-").tempdir()?;
        let socket_path = dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&socket_path).map_err(|source| PermissionError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        let session = Arc::new(GatewaySession::new(work_dir, tracked));
        let shutdown = session.shutdown.clone();
        let gateway = Arc::clone(self);
        let task = tokio::spawn(accept_loop(gateway, session, listener));

        tracing::debug!(socket = %socket_path.display(), "Permission gateway listening");
        Ok(GatewayHandle {
            socket_path,
            shutdown,
            task: Some(task),
            dir: Some(dir),
        })
    }
}

async fn accept_loop(
    gateway: Arc<PermissionGateway>,
    session: Arc<GatewaySession>,
    listener: UnixListener,
) {
    let shutdown = session.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(gateway.clone(), session.clone(), stream));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Permission socket accept failed");
                    break;
                }
            }
        }
    }
}

async fn serve_connection(
    gateway: Arc<PermissionGateway>,
    session: Arc<GatewaySession>,
    stream: UnixStream,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<PermissionResponse>();

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let line = match GatewayMessage::PermissionResponse(response).to_line() {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode permission response");
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                tracing::debug!(error = %e, "Permission client went away");
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let next = tokio::select! {
            _ = session.shutdown.cancelled() => break,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Permission connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match GatewayMessage::parse(&line) {
            Ok(GatewayMessage::PermissionRequest(request)) => {
                let gateway = gateway.clone();
                let session = session.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let approved = gateway.decide(&request, &session).await;
                    let _ = tx.send(PermissionResponse {
                        request_id: request.request_id,
                        approved,
                    });
                });
            }
            Ok(GatewayMessage::PermissionResponse(_)) => {
                tracing::warn!("Ignoring permission_response sent by a client");
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed permission message"),
        }
    }

    drop(tx);
    let _ = writer.await;
}

/// A running gateway socket. Cleanup happens on drop if `close` is not called.
pub struct GatewayHandle {
    socket_path: PathBuf,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    dir: Option<tempfile::TempDir>,
}

impl GatewayHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, cancel open prompts and remove the socket directory.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(error = %e, dir = %path.display(), "Failed to remove gateway directory");
            }
        }
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // TempDir removes the directory and socket when dropped.
    }
}
