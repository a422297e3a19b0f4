//! Prompt composition for each phase.
//!
//! The orchestrator treats the composed prompt as an opaque string; the
//! only contract is the output protocol the prompts ask agents to follow
//! (`Completed tasks:`, `FAILED:`, `VERDICT:`).

use crate::orchestrator::{PhaseResult, Role};
use crate::plan::Plan;
use crate::stream::truncate_str;

/// Maximum characters of a previous phase's output carried into a prompt.
const HISTORY_EXCERPT_CHARS: usize = 6_000;

/// Everything a composer may draw on for one phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    pub role: Role,
    pub prompt_content: &'a str,
    pub plan: &'a Plan,
    pub history: &'a [PhaseResult],
    /// Most recent reviewer output, for the Fixer.
    pub reviewer_feedback: Option<&'a str>,
    /// 0 on the first Implement attempt.
    pub planning_retry: u32,
    pub fix_iteration: u32,
}

pub trait ContextComposer: Send + Sync {
    fn compose(&self, ctx: &PhaseContext<'_>) -> String;
}

/// Default prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    fn task_section(plan: &Plan) -> String {
        let mut out = String::from("## TASKS\n");
        let pending = plan.pending_tasks();
        if pending.is_empty() {
            out.push_str("No pending tasks.\n");
        }
        for task in pending {
            out.push_str(&format!("- [ ] {}\n", task.title));
            if let Some(desc) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
                for line in desc.lines() {
                    out.push_str(&format!("      {}\n", line));
                }
            }
        }
        let completed = plan.completed_tasks();
        if !completed.is_empty() {
            out.push_str("\nAlready completed:\n");
            for task in completed {
                out.push_str(&format!("- [x] {}\n", task.title));
            }
        }
        out
    }

    fn failure_protocol(role: Role) -> String {
        format!(
            r#"## IF YOU ARE BLOCKED
If you cannot complete your work, stop and reply with:

FAILED ({role}): <one-line summary>

Requirements:
<what was needed>

Problems:
<what prevented it>

Possible solutions:
<how a human could unblock you>
"#
        )
    }

    fn planning_escalation(retry: u32) -> &'static str {
        match retry {
            0 => "",
            1 => {
                "## IMPORTANT\nYour previous attempt described a plan but changed no files. Do not describe the work again: make the changes now using your editing tools.\n\n"
            }
            2 => {
                "## IMPORTANT\nTwo attempts have produced no file changes. Skip all planning and explanation. Edit or create the files required by the tasks immediately, then report what you changed.\n\n"
            }
            _ => {
                "## FINAL ATTEMPT\nNo repository changes have been made yet. You MUST modify files in this attempt. A reply without file changes will be treated as a failed implementation. If something prevents you from editing files, use the FAILED format below instead of a plan.\n\n"
            }
        }
    }

    fn latest(history: &[PhaseResult], role: Role) -> Option<&str> {
        history
            .iter()
            .rev()
            .find(|r| r.role == role)
            .map(|r| r.raw_output.as_str())
    }

    fn excerpt(text: &str) -> String {
        truncate_str(text.trim(), HISTORY_EXCERPT_CHARS)
    }
}

impl ContextComposer for PromptComposer {
    fn compose(&self, ctx: &PhaseContext<'_>) -> String {
        let mut prompt = String::new();
        let goal = ctx.prompt_content.trim();
        if !goal.is_empty() {
            prompt.push_str("## GOAL\n");
            prompt.push_str(goal);
            prompt.push_str("\n\n");
        }
        if let Some(title) = ctx.plan.title() {
            prompt.push_str(&format!("Plan: {}\n\n", title));
        }
        prompt.push_str(&Self::task_section(ctx.plan));
        prompt.push('\n');

        let implementation = Self::latest(ctx.history, Role::Implementer);

        match ctx.role {
            Role::Implementer => {
                prompt.push_str(Self::planning_escalation(ctx.planning_retry));
                prompt.push_str(
                    r#"## YOUR ROLE: IMPLEMENTER
Implement the pending tasks by editing files in this repository. Check existing code before changing it and keep changes focused on the tasks.

When you are done, end your reply with the tasks you fully completed, using their exact titles:

Completed tasks:
- <task title>

"#,
                );
            }
            Role::Tester | Role::Verifier => {
                if let Some(out) = implementation {
                    prompt.push_str("## IMPLEMENTER REPORT\n");
                    prompt.push_str(&Self::excerpt(out));
                    prompt.push_str("\n\n");
                }
                if ctx.role == Role::Tester {
                    prompt.push_str(
                        "## YOUR ROLE: TESTER\nWrite or update tests covering the changes above, run the test suite and fix any test that is wrong. Do not change production behaviour unless a test exposes a genuine bug.\n\n",
                    );
                } else {
                    prompt.push_str(
                        "## YOUR ROLE: VERIFIER\nBuild the project, run its tests and linters, and confirm the changes above actually satisfy the tasks. Fix small breakages you find; report anything larger.\n\n",
                    );
                }
            }
            Role::Reviewer => {
                if let Some(out) = implementation {
                    prompt.push_str("## IMPLEMENTER REPORT\n");
                    prompt.push_str(&Self::excerpt(out));
                    prompt.push_str("\n\n");
                }
                if ctx.fix_iteration > 0 {
                    prompt.push_str(&format!(
                        "This is review pass {} after fixes were applied.\n\n",
                        ctx.fix_iteration + 1
                    ));
                }
                prompt.push_str(
                    r#"## YOUR ROLE: REVIEWER
Review the uncommitted changes in this repository against the tasks. Do not edit files. List concrete problems with file and line references.

Finish with exactly one verdict line:

VERDICT: ACCEPTABLE
or
VERDICT: NEEDS_FIXES

"#,
                );
            }
            Role::Fixer => {
                prompt.push_str("## REVIEWER FEEDBACK\n");
                prompt.push_str(&Self::excerpt(
                    ctx.reviewer_feedback.unwrap_or("(no feedback captured)"),
                ));
                prompt.push_str("\n\n");
                prompt.push_str(
                    "## YOUR ROLE: FIXER\nAddress every problem the reviewer raised by editing the code. Do not start unrelated work.\n\n",
                );
            }
        }

        if ctx.role != Role::Reviewer {
            prompt.push_str(&Self::failure_protocol(ctx.role));
        }
        prompt
    }
}
