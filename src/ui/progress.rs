use crate::orchestrator::{ExecutionResult, Role};
use crate::ui::icons::{CHECK, CROSS, SPARKLE, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Terminal progress for an orchestration run, rendered with `indicatif`.
///
/// Two bars are stacked vertically:
/// - Phase bar: role of the phase currently running and how many have finished
/// - Activity bar: spinner with elapsed time and the agent's latest tool use
///
/// Both bars are hidden while a permission prompt owns the terminal; see
/// [`Self::pause`].
pub struct OrchestratorUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    activity_bar: ProgressBar,
    verbose: bool,
    current: Mutex<PhaseLabel>,
}

#[derive(Default, Clone)]
struct PhaseLabel {
    role: Option<Role>,
    detail: String,
    elapsed: String,
}

impl OrchestratorUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());

        let phase_bar = multi.add(ProgressBar::new(0));
        if let Ok(phase_style) = ProgressStyle::default_bar().template("{prefix:.bold.dim} {pos} done {msg}")
        {
            phase_bar.set_style(phase_style);
        }
        phase_bar.set_prefix("Phases");

        let activity_bar = multi.add(ProgressBar::new_spinner());
        if let Ok(activity_style) = ProgressStyle::default_spinner().template("{prefix:.bold.dim} {spinner} {msg}")
        {
            activity_bar.set_style(activity_style);
        }
        activity_bar.set_prefix(" Agent");

        Self {
            multi,
            phase_bar,
            activity_bar,
            verbose,
            current: Mutex::new(PhaseLabel::default()),
        }
    }

    /// Print a line above the bars, falling back to stderr if the bars are gone.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn label(&self) -> std::sync::MutexGuard<'_, PhaseLabel> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn redraw(&self) {
        let label = self.label().clone();
        let Some(role) = label.role else {
            return;
        };
        let mut msg = format!("{}", style(role.title()).cyan());
        if !label.elapsed.is_empty() {
            msg.push_str(&format!(" {}", style(format!("({})", label.elapsed)).dim()));
        }
        if !label.detail.is_empty() {
            msg.push_str(&format!(" {}", style(&label.detail).yellow()));
        }
        self.activity_bar.set_message(msg);
    }

    /// Print the run banner.
    pub fn print_header(&self, plan: &str, backend: &str, pending: usize) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} {} {}",
            style("▶").green().bold(),
            style(plan).yellow().bold(),
            style(format!("({} pending task(s), backend: {})", pending, backend)).dim()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Show a phase as running and start the spinner. `note` is appended to
    /// the phase heading, e.g. a retry or fix-iteration counter.
    pub fn start_phase(&self, role: Role, note: Option<&str>) {
        {
            let mut label = self.label();
            label.role = Some(role);
            label.detail = String::new();
            label.elapsed = String::new();
        }
        let heading = match note {
            Some(note) => format!("{} {}", role.title(), style(format!("({})", note)).dim()),
            None => role.title().to_string(),
        };
        self.phase_bar.set_message(heading);
        self.redraw();
        self.activity_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Latest agent activity, e.g. a tool use description.
    pub fn update_activity(&self, activity: &str) {
        let changed = {
            let mut label = self.label();
            if label.detail == activity {
                false
            } else {
                label.detail = activity.to_string();
                true
            }
        };
        if changed {
            self.redraw();
            if self.verbose {
                self.print_line(format!("    {} {}", style("→").dim(), style(activity).dim()));
            }
        }
    }

    /// Refresh the spinner with wall-clock time; formats as `Xs` or `Xm Ys`.
    pub fn update_elapsed(&self, elapsed: Duration) {
        let secs = elapsed.as_secs();
        let time_str = if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        };
        self.label().elapsed = time_str;
        self.redraw();
    }

    /// Mark the running phase finished.
    pub fn finish_phase(&self, role: Role, failed: bool) {
        self.phase_bar.inc(1);
        self.activity_bar.set_message("");
        if failed {
            self.print_line(format!("  {}{} failed", CROSS, style(role.title()).red().bold()));
        } else {
            self.print_line(format!("  {}{} done", CHECK, style(role.title()).green()));
        }
    }

    pub fn warn(&self, msg: &str) {
        self.print_line(format!("  {}{}", WARN, style(msg).yellow()));
    }

    /// Hide the bars so another writer can own the terminal.
    pub fn pause(&self) {
        self.multi.set_draw_target(ProgressDrawTarget::hidden());
    }

    pub fn resume(&self) {
        self.multi.set_draw_target(ProgressDrawTarget::stderr());
    }

    /// Stop the spinner and print the run outcome.
    pub fn finish_run(&self, result: &ExecutionResult) {
        self.activity_bar.finish_and_clear();
        self.phase_bar.finish_and_clear();

        if result.success {
            self.print_line(format!(
                "\n{}Run complete {}",
                SPARKLE,
                style(format!(
                    "({} phase(s), {} fix iteration(s))",
                    result.metadata.phases, result.metadata.fix_iterations
                ))
                .dim()
            ));
            if result.metadata.max_iterations_reached {
                self.warn("Fix iteration limit reached; last review still requested fixes");
            }
            for title in &result.metadata.completed_tasks {
                self.print_line(format!("  {}{}", CHECK, title));
            }
        } else {
            self.print_line(format!("\n{}{}", CROSS, style("Run failed").red().bold()));
            if let Some(details) = &result.failure_details {
                self.print_line(format!(
                    "  {} {}",
                    style("Source:").dim(),
                    style(details.source_agent).yellow()
                ));
                self.print_line(format!(
                    "  {} {}",
                    style("Requirements:").dim(),
                    details.requirements
                ));
                self.print_line(format!("  {} {}", style("Problems:").dim(), details.problems));
                if let Some(solutions) = &details.solutions {
                    self.print_line(format!("  {} {}", style("Solutions:").dim(), solutions));
                }
            }
        }
    }
}
