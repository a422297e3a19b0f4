//! Text classification of agent output.
//!
//! Everything here is pure: functions take text (and repository snapshots)
//! and return plain data. The orchestrator decides what to do with it.

pub mod failure;
pub mod planning;
pub mod tasks;
pub mod verdict;

pub use failure::{FailureReport, FailureSections, infer_source_role, parse_failure};
pub use planning::{PlanningDetection, detect_planning_without_implementation};
pub use tasks::{match_pending_titles, parse_completed_tasks};
pub use verdict::{Verdict, parse_verdict};
