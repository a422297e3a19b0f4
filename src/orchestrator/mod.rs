//! The phase state machine.
//!
//! ```text
//! Implement ──▶ Verify ──▶ Review ──ACCEPTABLE──▶ done
//!   ▲    │                  ▲    │
//!   └────┘ planning retry   │    └─NEEDS_FIXES──▶ Fix
//!                           └─────────────────────┘
//! ```
//!
//! Every phase runs one agent process; the permission gateway listens for
//! the whole run. Any failed phase ends the run with [`FailureDetails`].

pub mod run;
pub mod types;

pub use run::{OrchestrationRun, TrackedFiles};
pub use types::{
    CaptureMode, ExecutionMetadata, ExecutionOutput, ExecutionResult, ExecutionStep,
    FailureDetails, PhaseResult, PlanInfo, Role,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{AgentBackend, InvocationRequest};
use crate::anvil_config::{PhaseProfile, PlanningExhaustionPolicy, UnknownVerdictPolicy};
use crate::classify::{
    Verdict, detect_planning_without_implementation, infer_source_role, match_pending_titles,
    parse_completed_tasks,
};
use crate::context::{ContextComposer, PhaseContext, PromptComposer};
use crate::errors::{AgentError, OrchestratorError};
use crate::permissions::{GatewayHandle, PermissionGateway};
use crate::plan::{Plan, PlanStore};
use crate::repo::{RepoState, Repository};
use crate::ui::OrchestratorUI;

/// Behaviour switches for a run.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub profile: PhaseProfile,
    /// Fixer invocations allowed before the loop stops.
    pub max_fix_iterations: u32,
    /// Total Implement attempts, including the first.
    pub planning_attempts: u32,
    pub planning_exhaustion: PlanningExhaustionPolicy,
    pub unknown_verdict: UnknownVerdictPolicy,
    pub capture: CaptureMode,
    pub model: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            profile: PhaseProfile::ThreeRole,
            max_fix_iterations: 5,
            planning_attempts: 4,
            planning_exhaustion: PlanningExhaustionPolicy::Proceed,
            unknown_verdict: UnknownVerdictPolicy::Acceptable,
            capture: CaptureMode::None,
            model: None,
        }
    }
}

/// How a run ended, before it is shaped into an [`ExecutionResult`].
enum Terminal {
    Success {
        max_iterations_reached: bool,
        final_verdict: Option<Verdict>,
    },
    Failure(FailureDetails),
}

/// Output of one phase invocation.
struct PhaseOutput {
    raw: String,
    failure: Option<FailureDetails>,
}

pub struct Orchestrator {
    backend: Arc<dyn AgentBackend>,
    repository: Arc<dyn Repository>,
    plans: Arc<dyn PlanStore>,
    composer: Arc<dyn ContextComposer>,
    gateway: Option<Arc<PermissionGateway>>,
    ui: Option<Arc<OrchestratorUI>>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        repository: Arc<dyn Repository>,
        plans: Arc<dyn PlanStore>,
    ) -> Self {
        Self {
            backend,
            repository,
            plans,
            composer: Arc::new(PromptComposer::new()),
            gateway: None,
            ui: None,
            options: OrchestratorOptions::default(),
        }
    }

    /// Route the agent's tool requests through `gateway` when the backend
    /// supports it.
    pub fn with_gateway(mut self, gateway: Arc<PermissionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the plan and return the shape selected by the capture mode.
    pub async fn execute(
        &self,
        prompt_content: &str,
        plan_info: &PlanInfo,
    ) -> Result<ExecutionOutput, OrchestratorError> {
        let result = self.run(prompt_content, plan_info).await?;
        Ok(result.into_output(self.options.capture))
    }

    /// Run the plan and return the full result regardless of capture mode.
    ///
    /// Only an unreadable plan is an `Err`; phase failures are reported in
    /// the result.
    pub async fn run(
        &self,
        prompt_content: &str,
        plan_info: &PlanInfo,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let plan = self
            .plans
            .read_plan(&plan_info.path)
            .map_err(|source| OrchestratorError::Plan {
                path: plan_info.path.clone(),
                source,
            })?;

        let mut run = OrchestrationRun::new();
        tracing::info!(
            plan = %plan_info.path.display(),
            pending = plan.pending_tasks().len(),
            backend = self.backend.name(),
            profile = %self.options.profile,
            "Starting orchestration run"
        );

        let gateway = self.start_gateway(&run).await;
        let socket = gateway.as_ref().map(|h| h.socket_path().to_path_buf());
        let terminal = self
            .drive(prompt_content, &plan, &mut run, socket.as_deref())
            .await;
        if let Some(handle) = gateway {
            handle.close().await;
        }

        let result = self.finish(plan_info, &plan, run, terminal);
        if let Some(ui) = &self.ui {
            ui.finish_run(&result);
        }
        Ok(result)
    }

    async fn start_gateway(&self, run: &OrchestrationRun) -> Option<GatewayHandle> {
        let gateway = self.gateway.as_ref()?;
        if !self.backend.supports_permission_gateway() {
            return None;
        }
        match gateway
            .start(self.repository.root(), run.tracked.clone())
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Permission gateway unavailable; tool requests outside the allow list will be denied"
                );
                None
            }
        }
    }

    async fn drive(
        &self,
        prompt_content: &str,
        plan: &Plan,
        run: &mut OrchestrationRun,
        socket: Option<&Path>,
    ) -> Terminal {
        if let Err(failure) = self.implement(prompt_content, plan, run, socket).await {
            return Terminal::Failure(failure);
        }

        let verify_role = match self.options.profile {
            PhaseProfile::ThreeRole => Role::Tester,
            PhaseProfile::TwoRole => Role::Verifier,
        };
        let prompt = self.compose(verify_role, prompt_content, plan, run, None, 0);
        let output = self.invoke_phase(verify_role, prompt, run, socket, None).await;
        if let Some(failure) = output.failure {
            return Terminal::Failure(self.fail(run, verify_role, output.raw, failure));
        }
        self.succeed(run, verify_role, output.raw, None);

        self.review_loop(prompt_content, plan, run, socket).await
    }

    /// Implement, retrying while the agent only plans.
    async fn implement(
        &self,
        prompt_content: &str,
        plan: &Plan,
        run: &mut OrchestrationRun,
        socket: Option<&Path>,
    ) -> Result<(), FailureDetails> {
        let attempts = self.options.planning_attempts.max(1);
        let mut attempt = 0;
        loop {
            let before = self.snapshot().await;
            let prompt = self.compose(Role::Implementer, prompt_content, plan, run, None, attempt);
            let note = (attempt > 0).then(|| format!("attempt {}/{}", attempt + 1, attempts));
            let output = self
                .invoke_phase(Role::Implementer, prompt, run, socket, note.as_deref())
                .await;
            if let Some(failure) = output.failure {
                return Err(self.fail(run, Role::Implementer, output.raw, failure));
            }

            let after = self.snapshot().await;
            let detection =
                detect_planning_without_implementation(&output.raw, before.as_ref(), after.as_ref());
            if detection.repository_status_unavailable {
                tracing::debug!("Repository state unavailable; skipping planning check");
            }
            if !detection.detected {
                self.succeed(run, Role::Implementer, output.raw, None);
                return Ok(());
            }

            attempt += 1;
            if attempt >= attempts {
                tracing::warn!(
                    attempts,
                    indicators = ?detection.planning_indicators,
                    policy = %self.options.planning_exhaustion,
                    "Implementer never changed the repository"
                );
                if let Some(ui) = &self.ui {
                    ui.warn("Implementer made no repository changes after all attempts");
                }
                return match self.options.planning_exhaustion {
                    PlanningExhaustionPolicy::Proceed => {
                        self.succeed(run, Role::Implementer, output.raw, None);
                        Ok(())
                    }
                    PlanningExhaustionPolicy::Fail => {
                        let failure = FailureDetails {
                            requirements: "The implementer must make changes to the repository"
                                .to_string(),
                            problems: format!(
                                "No repository changes after {} attempt(s); the output only described a plan ({})",
                                attempts,
                                detection.planning_indicators.join(", ")
                            ),
                            solutions: Some(
                                "Narrow the task or check that the agent can write to the working tree"
                                    .to_string(),
                            ),
                            source_agent: Role::Implementer,
                        };
                        Err(self.fail(run, Role::Implementer, output.raw, failure))
                    }
                };
            }

            run.planning_retries += 1;
            tracing::info!(
                attempt = attempt + 1,
                attempts,
                indicators = ?detection.planning_indicators,
                "Implementer planned without changing the repository; retrying"
            );
        }
    }

    async fn review_loop(
        &self,
        prompt_content: &str,
        plan: &Plan,
        run: &mut OrchestrationRun,
        socket: Option<&Path>,
    ) -> Terminal {
        loop {
            let note = (run.fix_iterations > 0).then(|| format!("after fix {}", run.fix_iterations));
            let prompt = self.compose(Role::Reviewer, prompt_content, plan, run, None, 0);
            let output = self
                .invoke_phase(Role::Reviewer, prompt, run, socket, note.as_deref())
                .await;
            if let Some(failure) = output.failure {
                return Terminal::Failure(self.fail(run, Role::Reviewer, output.raw, failure));
            }

            let verdict = self.backend.parse_verdict(&output.raw);
            let effective = match verdict {
                Verdict::Unknown => {
                    tracing::warn!(policy = %self.options.unknown_verdict, "Reviewer gave no verdict");
                    match self.options.unknown_verdict {
                        UnknownVerdictPolicy::Acceptable => Verdict::Acceptable,
                        UnknownVerdictPolicy::NeedsFixes => Verdict::NeedsFixes,
                        UnknownVerdictPolicy::Fail => {
                            let failure = FailureDetails {
                                requirements: "The reviewer must end with an ACCEPTABLE or NEEDS_FIXES verdict"
                                    .to_string(),
                                problems: "No verdict token found in the review".to_string(),
                                solutions: None,
                                source_agent: Role::Reviewer,
                            };
                            run.record(PhaseResult {
                                role: Role::Reviewer,
                                raw_output: output.raw,
                                failed: true,
                                verdict: Some(Verdict::Unknown),
                            });
                            self.finish_ui_phase(Role::Reviewer, true);
                            return Terminal::Failure(failure);
                        }
                    }
                }
                v => v,
            };
            let review = output.raw;
            self.succeed(run, Role::Reviewer, review.clone(), Some(verdict));

            if effective == Verdict::Acceptable {
                return Terminal::Success {
                    max_iterations_reached: false,
                    final_verdict: Some(verdict),
                };
            }

            if run.fix_iterations >= self.options.max_fix_iterations {
                tracing::warn!(
                    max = self.options.max_fix_iterations,
                    "Fix iteration limit reached; returning last review"
                );
                return Terminal::Success {
                    max_iterations_reached: true,
                    final_verdict: Some(verdict),
                };
            }

            run.fix_iterations += 1;
            let fix_iteration = run.fix_iterations;
            let prompt = self.compose(
                Role::Fixer,
                prompt_content,
                plan,
                run,
                Some(&review),
                0,
            );
            let note = format!("iteration {}/{}", fix_iteration, self.options.max_fix_iterations);
            let output = self
                .invoke_phase(Role::Fixer, prompt, run, socket, Some(&note))
                .await;
            if let Some(failure) = output.failure {
                return Terminal::Failure(self.fail(run, Role::Fixer, output.raw, failure));
            }
            self.succeed(run, Role::Fixer, output.raw, None);
        }
    }

    fn compose(
        &self,
        role: Role,
        prompt_content: &str,
        plan: &Plan,
        run: &OrchestrationRun,
        reviewer_feedback: Option<&str>,
        planning_retry: u32,
    ) -> String {
        self.composer.compose(&PhaseContext {
            role,
            prompt_content,
            plan,
            history: run.results(),
            reviewer_feedback,
            planning_retry,
            fix_iteration: run.fix_iterations,
        })
    }

    async fn snapshot(&self) -> Option<RepoState> {
        let repository = Arc::clone(&self.repository);
        match tokio::task::spawn_blocking(move || repository.capture_state()).await {
            Ok(Ok(state)) => Some(state),
            Ok(Err(e)) => {
                tracing::warn!(error = %format!("{:#}", e), "Could not capture repository state");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Repository snapshot task failed");
                None
            }
        }
    }

    async fn allowed_tools(&self) -> Vec<String> {
        match &self.gateway {
            Some(gateway) if self.backend.supports_permission_gateway() => {
                gateway.rules().read().await.to_entries()
            }
            _ => Vec::new(),
        }
    }

    async fn invoke_phase(
        &self,
        role: Role,
        prompt: String,
        run: &OrchestrationRun,
        socket: Option<&Path>,
        note: Option<&str>,
    ) -> PhaseOutput {
        if let Some(ui) = &self.ui {
            ui.start_phase(role, note);
        }
        tracing::info!(%role, note, "Starting phase");

        let mut request = InvocationRequest::new(role, prompt, self.repository.root());
        request.model = self.options.model.clone();
        request.permission_socket = socket.map(PathBuf::from);
        request.allowed_tools = self.allowed_tools().await;
        request.tracked = run.tracked.clone();
        request.ui = self.ui.clone();

        match self.backend.invoke(request).await {
            Ok(outcome) => {
                let failure = self.classify(role, &outcome.final_message).or_else(|| {
                    outcome.failure_message.as_ref().map(|message| FailureDetails {
                        requirements: format!("The {} phase must finish without an agent error", role),
                        problems: message.clone(),
                        solutions: None,
                        source_agent: role,
                    })
                });
                PhaseOutput {
                    raw: outcome.final_message,
                    failure,
                }
            }
            Err(e) => {
                tracing::warn!(%role, error = %e, "Agent invocation failed");
                PhaseOutput {
                    raw: String::new(),
                    failure: Some(agent_error_details(role, &e)),
                }
            }
        }
    }

    /// FAILED marker check. Reviewer output is judged by its verdict only.
    fn classify(&self, role: Role, raw: &str) -> Option<FailureDetails> {
        if role == Role::Reviewer {
            return None;
        }
        let report = self.backend.parse_failure(raw);
        if !report.failed {
            return None;
        }
        // Only the combined verifier covers more than one role; its tag or
        // section headings may narrow the source to one of them.
        let source = if role == Role::Verifier {
            report
                .tagged_role
                .or_else(|| infer_source_role(raw))
                .filter(|r| matches!(r, Role::Tester | Role::Reviewer | Role::Verifier))
                .unwrap_or(role)
        } else {
            role
        };
        Some(report.into_details(source))
    }

    fn succeed(&self, run: &mut OrchestrationRun, role: Role, raw: String, verdict: Option<Verdict>) {
        run.record(PhaseResult {
            role,
            raw_output: raw,
            failed: false,
            verdict,
        });
        self.finish_ui_phase(role, false);
    }

    fn fail(
        &self,
        run: &mut OrchestrationRun,
        role: Role,
        raw: String,
        failure: FailureDetails,
    ) -> FailureDetails {
        tracing::warn!(
            %role,
            source = %failure.source_agent,
            problems = %failure.problems,
            "Phase failed; stopping run"
        );
        run.record(PhaseResult {
            role,
            raw_output: raw,
            failed: true,
            verdict: None,
        });
        self.finish_ui_phase(role, true);
        failure
    }

    fn finish_ui_phase(&self, role: Role, failed: bool) {
        if let Some(ui) = &self.ui {
            ui.finish_phase(role, failed);
        }
    }

    /// Mark the tasks the implementer reported as done.
    fn mark_completed(&self, plan_info: &PlanInfo, plan: &Plan, run: &OrchestrationRun) -> Vec<String> {
        let Some(implementer) = run
            .results()
            .iter()
            .rev()
            .find(|r| r.role == Role::Implementer)
        else {
            return Vec::new();
        };
        let claimed = parse_completed_tasks(&implementer.raw_output);
        if claimed.is_empty() {
            return Vec::new();
        }
        let pending: Vec<&str> = plan
            .pending_tasks()
            .into_iter()
            .map(|t| t.title.as_str())
            .collect();
        let matched = match_pending_titles(&claimed, &pending);
        if matched.len() < claimed.len() {
            tracing::debug!(
                claimed = claimed.len(),
                matched = matched.len(),
                "Ignoring completed-task claims that match no pending task"
            );
        }
        if matched.is_empty() {
            return matched;
        }
        match self.plans.mark_tasks_done(&plan_info.path, &matched) {
            Ok(changed) => {
                tracing::info!(changed, "Marked tasks done");
                matched
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "Failed to mark tasks done");
                Vec::new()
            }
        }
    }

    fn finish(
        &self,
        plan_info: &PlanInfo,
        plan: &Plan,
        run: OrchestrationRun,
        terminal: Terminal,
    ) -> ExecutionResult {
        let (success, max_iterations_reached, final_verdict, failure_details) = match terminal {
            Terminal::Success {
                max_iterations_reached,
                final_verdict,
            } => (true, max_iterations_reached, final_verdict, None),
            Terminal::Failure(details) => (false, false, None, Some(details)),
        };

        let completed_tasks = if success {
            self.mark_completed(plan_info, plan, &run)
        } else {
            Vec::new()
        };

        let metadata = ExecutionMetadata {
            phases: run.results().len(),
            fix_iterations: run.fix_iterations,
            planning_retries: run.planning_retries,
            max_iterations_reached,
            final_verdict,
            completed_tasks,
            tracked_files: run.tracked.len(),
        };
        let results = run.into_results();
        let content = results
            .last()
            .map(|r| r.raw_output.clone())
            .unwrap_or_default();

        ExecutionResult {
            content,
            steps: steps_for(&results),
            metadata,
            success,
            failure_details,
        }
    }
}

/// One step per phase; repeated roles are numbered.
fn steps_for(results: &[PhaseResult]) -> Vec<ExecutionStep> {
    let mut totals: HashMap<Role, usize> = HashMap::new();
    for result in results {
        *totals.entry(result.role).or_default() += 1;
    }
    let mut seen: HashMap<Role, usize> = HashMap::new();
    results
        .iter()
        .map(|result| {
            let n = seen.entry(result.role).or_default();
            *n += 1;
            let title = if totals.get(&result.role).copied().unwrap_or(0) > 1 {
                format!("{} ({})", result.role.title(), n)
            } else {
                result.role.title().to_string()
            };
            ExecutionStep {
                title,
                body: result.raw_output.clone(),
            }
        })
        .collect()
}

fn agent_error_details(role: Role, error: &AgentError) -> FailureDetails {
    let solutions = match error {
        AgentError::SpawnFailed { .. } => {
            Some("Check that the agent CLI is installed and on PATH, or set ANVIL_AGENT_CMD".into())
        }
        AgentError::Timeout { .. } => Some(
            "Raise the timeout in .anvil/anvil.toml or split the task into smaller pieces".into(),
        ),
        _ => None,
    };
    FailureDetails {
        requirements: format!("The {} agent must run to completion", role),
        problems: error.to_string(),
        solutions,
        source_agent: role,
    }
}
