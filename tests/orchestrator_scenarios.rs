//! End-to-end behaviour of the phase state machine against scripted
//! collaborators. No agent binaries or git repositories are involved.

use anvil::agent::{AgentBackend, InvocationRequest};
use anvil::anvil_config::{PhaseProfile, PlanningExhaustionPolicy, UnknownVerdictPolicy};
use anvil::classify::Verdict;
use anvil::errors::{AgentError, PermissionError, TimeoutKind};
use anvil::orchestrator::{
    CaptureMode, ExecutionOutput, Orchestrator, OrchestratorOptions, PlanInfo, Role,
};
use anvil::permissions::rules::{AllowRuleSet, shared};
use anvil::permissions::{
    GatewayConfig, PermissionChoice, PermissionGateway, PermissionPrompter, PromptRequest,
};
use anvil::plan::{Plan, PlanStore, Task};
use anvil::repo::{RepoState, Repository};
use anvil::stream::FoldOutcome;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Collaborators
// =============================================================================

/// In-memory repository whose diff hash changes when an agent "edits" it.
struct FakeRepo {
    root: PathBuf,
    edits: AtomicUsize,
}

impl FakeRepo {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            root: PathBuf::from("/work/widget"),
            edits: AtomicUsize::new(0),
        })
    }

    fn edit(&self) {
        self.edits.fetch_add(1, Ordering::SeqCst);
    }
}

impl Repository for FakeRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    fn capture_state(&self) -> anyhow::Result<RepoState> {
        let edits = self.edits.load(Ordering::SeqCst);
        Ok(RepoState {
            commit_hash: Some("c0ffee".into()),
            has_changes: edits > 0,
            status_output: if edits > 0 { " M src/lib.rs".into() } else { String::new() },
            diff_hash: format!("diff-{}", edits),
        })
    }

    fn identity(&self) -> String {
        "github.com/acme/widget".into()
    }
}

/// What a scripted phase does.
#[derive(Clone)]
enum Reply {
    /// Final message, and whether the repository changes.
    Text(String, bool),
    Error(fn() -> AgentError),
    /// Ask the gateway about each Bash command before answering.
    AskBash(Vec<String>, String),
}

fn say(text: &str) -> Reply {
    Reply::Text(text.to_string(), false)
}

fn edit(text: &str) -> Reply {
    Reply::Text(text.to_string(), true)
}

/// Backend that replays scripted replies per role and records every call.
struct ScriptedBackend {
    repo: Arc<FakeRepo>,
    script: Mutex<HashMap<Role, VecDeque<Reply>>>,
    calls: Mutex<Vec<Role>>,
    requests: Mutex<Vec<(Role, Option<PathBuf>, Vec<String>)>>,
    approvals: Mutex<Vec<bool>>,
    gateway: bool,
}

impl ScriptedBackend {
    fn new(repo: Arc<FakeRepo>) -> Self {
        Self {
            repo,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            approvals: Mutex::new(Vec::new()),
            gateway: false,
        }
    }

    fn with_gateway(mut self) -> Self {
        self.gateway = true;
        self
    }

    fn on(self, role: Role, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    fn calls(&self) -> Vec<Role> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, role: Role) -> usize {
        self.calls().iter().filter(|r| **r == role).count()
    }

    fn default_reply(role: Role) -> Reply {
        match role {
            Role::Implementer => edit("Implemented the change."),
            Role::Tester | Role::Verifier => say("All tests pass."),
            Role::Reviewer => say("Looks good.\n\nVERDICT: ACCEPTABLE"),
            Role::Fixer => edit("Applied the requested fixes."),
        }
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_permission_gateway(&self) -> bool {
        self.gateway
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<FoldOutcome, AgentError> {
        self.calls.lock().unwrap().push(request.role);
        self.requests.lock().unwrap().push((
            request.role,
            request.permission_socket.clone(),
            request.allowed_tools.clone(),
        ));
        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&request.role)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Self::default_reply(request.role));

        match reply {
            Reply::Text(text, changes) => {
                if changes {
                    self.repo.edit();
                }
                Ok(FoldOutcome {
                    final_message: text,
                    ..Default::default()
                })
            }
            Reply::Error(make) => Err(make()),
            Reply::AskBash(commands, text) => {
                let socket = request
                    .permission_socket
                    .clone()
                    .expect("gateway socket for this phase");
                for command in commands {
                    let approved = anvil::permissions::bridge::ask_gateway(
                        &socket,
                        "Bash",
                        json!({ "command": command }),
                    )
                    .await
                    .unwrap();
                    self.approvals.lock().unwrap().push(approved);
                }
                self.repo.edit();
                Ok(FoldOutcome {
                    final_message: text,
                    ..Default::default()
                })
            }
        }
    }
}

/// Plan store holding one plan in memory.
struct MemoryPlans {
    plan: Plan,
    marked: Mutex<Vec<String>>,
    mark_calls: AtomicUsize,
    unreadable: bool,
}

impl MemoryPlans {
    fn with_tasks(titles: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            plan: Plan {
                tasks: titles.iter().map(|t| Task::new(*t)).collect(),
                ..Default::default()
            },
            marked: Mutex::new(Vec::new()),
            mark_calls: AtomicUsize::new(0),
            unreadable: false,
        })
    }

    fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

impl PlanStore for MemoryPlans {
    fn read_plan(&self, path: &Path) -> anyhow::Result<Plan> {
        if self.unreadable {
            anyhow::bail!("no such plan: {}", path.display());
        }
        Ok(self.plan.clone())
    }

    fn mark_tasks_done(&self, _path: &Path, titles: &[String]) -> anyhow::Result<usize> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        self.marked.lock().unwrap().extend(titles.iter().cloned());
        Ok(titles.len())
    }
}

/// Prompter answering with a fixed choice.
struct FixedPrompter {
    choice: PermissionChoice,
    calls: AtomicUsize,
}

#[async_trait]
impl PermissionPrompter for FixedPrompter {
    async fn prompt(
        &self,
        _request: &PromptRequest,
        _cancel: CancellationToken,
    ) -> Result<PermissionChoice, PermissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.choice.clone())
    }
}

const PLAN_TASKS: [&str; 2] = ["Add the cache module", "Wire the cache into the CLI"];

fn plan_info() -> PlanInfo {
    PlanInfo::new("/work/widget/plans/cache.yml")
}

fn orchestrator(
    backend: &Arc<ScriptedBackend>,
    repo: &Arc<FakeRepo>,
    plans: &Arc<MemoryPlans>,
    options: OrchestratorOptions,
) -> Orchestrator {
    Orchestrator::new(backend.clone(), repo.clone(), plans.clone()).with_options(options)
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_happy_path_marks_reported_task() {
        let repo = FakeRepo::new();
        let review = "The cache is well structured.\n\nACCEPTABLE";
        let backend = Arc::new(
            ScriptedBackend::new(repo.clone())
                .on(
                    Role::Implementer,
                    edit("Added src/cache.rs.\n\nCompleted tasks:\n- [x] Add the cache module\n"),
                )
                .on(Role::Tester, say("cargo test: 12 passed"))
                .on(Role::Reviewer, say(review)),
        );
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("Add a cache", &plan_info())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            backend.calls(),
            vec![Role::Implementer, Role::Tester, Role::Reviewer]
        );
        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.content, review);
        assert_eq!(plans.marked(), vec!["Add the cache module"]);
        assert_eq!(result.metadata.completed_tasks, vec!["Add the cache module"]);
        assert_eq!(result.metadata.final_verdict, Some(Verdict::Acceptable));
        assert!(result.failure_details.is_none());
    }

    #[tokio::test]
    async fn test_one_fix_round() {
        let repo = FakeRepo::new();
        let backend = Arc::new(
            ScriptedBackend::new(repo.clone())
                .on(Role::Reviewer, say("Missing error handling.\n\nVERDICT: NEEDS_FIXES"))
                .on(Role::Reviewer, say("Fixed.\n\nVERDICT: ACCEPTABLE")),
        );
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            backend.calls(),
            vec![
                Role::Implementer,
                Role::Tester,
                Role::Reviewer,
                Role::Fixer,
                Role::Reviewer
            ]
        );
        assert_eq!(result.metadata.fix_iterations, 1);
        assert!(!result.metadata.max_iterations_reached);
        let titles: Vec<&str> = result.steps.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Implementation", "Testing", "Review (1)", "Fixes", "Review (2)"]
        );
    }

    #[tokio::test]
    async fn test_implementer_failure_short_circuits() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Implementer,
            say("FAILED: cannot build\n\nRequirements:\nA compiling workspace\n\nProblems:\nlibssl missing\n\nCompleted tasks:\n- Add the cache module\n"),
        ));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(backend.calls(), vec![Role::Implementer]);
        let details = result.failure_details.unwrap();
        assert_eq!(details.source_agent, Role::Implementer);
        assert_eq!(details.requirements, "A compiling workspace");
        assert!(details.problems.contains("libssl missing"));
        assert_eq!(plans.mark_calls.load(Ordering::SeqCst), 0);
        assert!(result.metadata.completed_tasks.is_empty());
    }
}

// =============================================================================
// Loop bounds
// =============================================================================

mod bounds {
    use super::*;

    #[tokio::test]
    async fn test_fix_loop_stops_after_five_fixes() {
        let repo = FakeRepo::new();
        let mut backend = ScriptedBackend::new(repo.clone());
        for _ in 0..10 {
            backend = backend.on(Role::Reviewer, say("Still wrong.\n\nNEEDS_FIXES"));
        }
        let backend = Arc::new(backend);
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.metadata.max_iterations_reached);
        assert_eq!(backend.count(Role::Fixer), 5);
        assert_eq!(backend.count(Role::Reviewer), 6);
        assert_eq!(result.content, "Still wrong.\n\nNEEDS_FIXES");
        assert_eq!(result.metadata.final_verdict, Some(Verdict::NeedsFixes));

        // Every fix is immediately followed by a review.
        let calls = backend.calls();
        for (i, role) in calls.iter().enumerate() {
            if *role == Role::Fixer {
                assert_eq!(calls[i + 1], Role::Reviewer);
            }
        }
    }

    #[tokio::test]
    async fn test_custom_fix_limit() {
        let repo = FakeRepo::new();
        let backend = Arc::new(
            ScriptedBackend::new(repo.clone())
                .on(Role::Reviewer, say("NEEDS_FIXES"))
                .on(Role::Reviewer, say("NEEDS_FIXES")),
        );
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            max_fix_iterations: 1,
            ..Default::default()
        };

        let result = orchestrator(&backend, &repo, &plans, options)
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(result.metadata.max_iterations_reached);
        assert_eq!(backend.count(Role::Fixer), 1);
    }

    const PLAN_ONLY: &str = "Here's my plan:\n\n1. I will create src/cache.rs\n2. Wire it in";

    #[tokio::test]
    async fn test_planning_retry_until_changes() {
        let repo = FakeRepo::new();
        let backend = Arc::new(
            ScriptedBackend::new(repo.clone())
                .on(Role::Implementer, say(PLAN_ONLY))
                .on(Role::Implementer, say(PLAN_ONLY))
                .on(Role::Implementer, edit("Created src/cache.rs.")),
        );
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(backend.count(Role::Implementer), 3);
        assert_eq!(result.metadata.planning_retries, 2);
        // Only the attempt that changed the repository is kept.
        assert_eq!(result.steps[0].body, "Created src/cache.rs.");
    }

    #[tokio::test]
    async fn test_planning_exhaustion_proceeds_by_default() {
        let repo = FakeRepo::new();
        let mut backend = ScriptedBackend::new(repo.clone());
        for _ in 0..6 {
            backend = backend.on(Role::Implementer, say(PLAN_ONLY));
        }
        let backend = Arc::new(backend);
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(backend.count(Role::Implementer), 4);
        assert_eq!(backend.count(Role::Tester), 1);
        assert_eq!(backend.count(Role::Reviewer), 1);
    }

    #[tokio::test]
    async fn test_planning_exhaustion_can_fail_the_run() {
        let repo = FakeRepo::new();
        let mut backend = ScriptedBackend::new(repo.clone());
        for _ in 0..6 {
            backend = backend.on(Role::Implementer, say(PLAN_ONLY));
        }
        let backend = Arc::new(backend);
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            planning_attempts: 2,
            planning_exhaustion: PlanningExhaustionPolicy::Fail,
            ..Default::default()
        };

        let result = orchestrator(&backend, &repo, &plans, options)
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(backend.calls(), vec![Role::Implementer, Role::Implementer]);
        let details = result.failure_details.unwrap();
        assert_eq!(details.source_agent, Role::Implementer);
        assert!(details.problems.contains("2 attempt(s)"));
    }
}

// =============================================================================
// Policies and failure attribution
// =============================================================================

mod policies {
    use super::*;

    async fn run_with_unknown(
        policy: UnknownVerdictPolicy,
    ) -> (Arc<ScriptedBackend>, anvil::orchestrator::ExecutionResult) {
        let repo = FakeRepo::new();
        let backend = Arc::new(
            ScriptedBackend::new(repo.clone())
                .on(Role::Reviewer, say("I read the code."))
                .on(Role::Reviewer, say("I read the code again.")),
        );
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            unknown_verdict: policy,
            max_fix_iterations: 1,
            ..Default::default()
        };
        let result = orchestrator(&backend, &repo, &plans, options)
            .run("", &plan_info())
            .await
            .unwrap();
        (backend, result)
    }

    #[tokio::test]
    async fn test_unknown_verdict_acceptable() {
        let (backend, result) = run_with_unknown(UnknownVerdictPolicy::Acceptable).await;
        assert!(result.success);
        assert_eq!(backend.count(Role::Fixer), 0);
        assert_eq!(result.metadata.final_verdict, Some(Verdict::Unknown));
    }

    #[tokio::test]
    async fn test_unknown_verdict_needs_fixes() {
        let (backend, result) = run_with_unknown(UnknownVerdictPolicy::NeedsFixes).await;
        assert!(result.success);
        assert_eq!(backend.count(Role::Fixer), 1);
        assert!(result.metadata.max_iterations_reached);
    }

    #[tokio::test]
    async fn test_unknown_verdict_fail() {
        let (backend, result) = run_with_unknown(UnknownVerdictPolicy::Fail).await;
        assert!(!result.success);
        assert_eq!(backend.count(Role::Fixer), 0);
        assert_eq!(
            result.failure_details.unwrap().source_agent,
            Role::Reviewer
        );
    }

    #[tokio::test]
    async fn test_two_role_profile_uses_verifier() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Verifier,
            say("## Testing\nAll tests pass.\n\n## Review\nFAILED: the cache never evicts\n"),
        ));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            profile: PhaseProfile::TwoRole,
            ..Default::default()
        };

        let result = orchestrator(&backend, &repo, &plans, options)
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(backend.calls(), vec![Role::Implementer, Role::Verifier]);
        assert_eq!(
            result.failure_details.unwrap().source_agent,
            Role::Reviewer
        );
    }

    #[tokio::test]
    async fn test_tester_failure_ignores_role_tag() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Tester,
            say("Ran the suite.\n\nFAILED (reviewer): the implementation has no tests to run"),
        ));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert_eq!(backend.calls(), vec![Role::Implementer, Role::Tester]);
        assert_eq!(result.failure_details.unwrap().source_agent, Role::Tester);
    }

    #[tokio::test]
    async fn test_verifier_tag_outside_its_roles_stays_verifier() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Verifier,
            say("FAILED (implementer): the module does not compile"),
        ));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            profile: PhaseProfile::TwoRole,
            ..Default::default()
        };

        let result = orchestrator(&backend, &repo, &plans, options)
            .run("", &plan_info())
            .await
            .unwrap();

        assert_eq!(backend.calls(), vec![Role::Implementer, Role::Verifier]);
        assert_eq!(result.failure_details.unwrap().source_agent, Role::Verifier);
    }

    #[tokio::test]
    async fn test_verifier_tag_selects_tester() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Verifier,
            say("FAILED (tester): cargo test exits with 101"),
        ));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            profile: PhaseProfile::TwoRole,
            ..Default::default()
        };

        let result = orchestrator(&backend, &repo, &plans, options)
            .run("", &plan_info())
            .await
            .unwrap();

        assert_eq!(result.failure_details.unwrap().source_agent, Role::Tester);
    }

    #[tokio::test]
    async fn test_agent_timeout_becomes_failure_details() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Fixer,
            Reply::Error(|| AgentError::Timeout {
                kind: TimeoutKind::Inactivity,
                after: Duration::from_secs(1800),
            }),
        ).on(Role::Reviewer, say("NEEDS_FIXES")));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(
            backend.calls(),
            vec![Role::Implementer, Role::Tester, Role::Reviewer, Role::Fixer]
        );
        let details = result.failure_details.unwrap();
        assert_eq!(details.source_agent, Role::Fixer);
        assert!(details.solutions.is_some());
    }

    #[tokio::test]
    async fn test_unreadable_plan_is_an_error() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()));
        let plans = Arc::new(MemoryPlans {
            plan: Plan::default(),
            marked: Mutex::new(Vec::new()),
            mark_calls: AtomicUsize::new(0),
            unreadable: true,
        });

        let err = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap_err();

        assert!(matches!(err, anvil::errors::OrchestratorError::Plan { .. }));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_claims_are_ignored() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()).on(
            Role::Implementer,
            edit("Completed tasks:\n- Rewrite everything in Go\n- wire the cache into the cli\n"),
        ));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .run("", &plan_info())
            .await
            .unwrap();

        assert_eq!(plans.marked(), vec!["Wire the cache into the CLI"]);
        assert_eq!(result.metadata.completed_tasks, vec!["Wire the cache into the CLI"]);
    }
}

// =============================================================================
// Capture modes
// =============================================================================

mod capture {
    use super::*;

    async fn execute(capture: CaptureMode) -> ExecutionOutput {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let options = OrchestratorOptions {
            capture,
            ..Default::default()
        };
        orchestrator(&backend, &repo, &plans, options)
            .execute("", &plan_info())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_capture_none() {
        assert_eq!(execute(CaptureMode::None).await, ExecutionOutput::None);
    }

    #[tokio::test]
    async fn test_capture_all_is_transcript() {
        let ExecutionOutput::All(text) = execute(CaptureMode::All).await else {
            panic!("expected transcript");
        };
        assert!(text.starts_with("## Implementation\n\nImplemented the change."));
        assert!(text.contains("## Testing"));
        assert!(text.contains("## Review"));
    }

    #[tokio::test]
    async fn test_capture_result_serializes() {
        let ExecutionOutput::Result(result) = execute(CaptureMode::Result).await else {
            panic!("expected result");
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["metadata"]["phases"], json!(3));
        assert!(value.get("failureDetails").is_none());
    }
}

// =============================================================================
// Permission gateway
// =============================================================================

mod gateway {
    use super::*;

    #[tokio::test]
    async fn test_session_rule_applies_within_run() {
        let repo = FakeRepo::new();
        let backend = Arc::new(
            ScriptedBackend::new(repo.clone())
                .with_gateway()
                .on(
                    Role::Implementer,
                    Reply::AskBash(
                        vec![
                            "cargo test --lib".into(),
                            "cargo test --doc".into(),
                            "git push origin main".into(),
                        ],
                        "Done.".into(),
                    ),
                ),
        );
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let prompter = Arc::new(FixedPrompter {
            choice: PermissionChoice::AllowSession {
                prefix: Some("cargo test".into()),
            },
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            denied: AllowRuleSet::from_entries(["Bash(git push:*)"]),
            ..Default::default()
        };
        let gateway = Arc::new(PermissionGateway::new(
            shared(AllowRuleSet::from_entries(["Read"])),
            prompter.clone(),
            config,
        ));

        let result = orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .with_gateway(gateway)
            .run("", &plan_info())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(*backend.approvals.lock().unwrap(), vec![true, true, false]);
        assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);

        let requests = backend.requests.lock().unwrap();
        // One socket for the whole run, and gone afterwards.
        let socket = requests[0].1.clone().unwrap();
        assert!(requests.iter().all(|(_, s, _)| s.as_ref() == Some(&socket)));
        assert!(!socket.exists());
        // Later phases see the session rule.
        assert_eq!(requests[0].2, vec!["Read"]);
        assert!(requests[1].2.contains(&"Bash(cargo test:*)".to_string()));
    }

    #[tokio::test]
    async fn test_no_socket_without_gateway_support() {
        let repo = FakeRepo::new();
        let backend = Arc::new(ScriptedBackend::new(repo.clone()));
        let plans = MemoryPlans::with_tasks(&PLAN_TASKS);
        let prompter = Arc::new(FixedPrompter {
            choice: PermissionChoice::Disallow,
            calls: AtomicUsize::new(0),
        });
        let gateway = Arc::new(PermissionGateway::new(
            shared(AllowRuleSet::new()),
            prompter,
            GatewayConfig::default(),
        ));

        orchestrator(&backend, &repo, &plans, OrchestratorOptions::default())
            .with_gateway(gateway)
            .run("", &plan_info())
            .await
            .unwrap();

        let requests = backend.requests.lock().unwrap();
        assert!(requests.iter().all(|(_, s, tools)| s.is_none() && tools.is_empty()));
    }
}
