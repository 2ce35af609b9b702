//! Run results for humans and CI.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{TestInfo, TestOutcome, TestState};

/// Orchestrator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Booting,
    Syncing,
    RunningTests,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Booting => "BOOTING",
            RunPhase::Syncing => "SYNCING",
            RunPhase::RunningTests => "RUNNING_TESTS",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Why a run ended in [`RunPhase::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseFailure {
    /// No boot-complete signal within the boot timeout.
    BootTimeout { limit: Duration },

    /// Kernel exited before signalling boot completion.
    BootExited,

    /// No sync marker within the handshake timeout.
    SyncTimeout { limit: Duration },

    /// Kernel exited before the sync marker.
    SyncExited,

    /// The whole-run deadline elapsed.
    RunTimeout { limit: Duration },
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseFailure::BootTimeout { limit } => {
                write!(f, "kernel did not finish booting within {:?}", limit)
            }
            PhaseFailure::BootExited => f.write_str("kernel exited before finishing boot"),
            PhaseFailure::SyncTimeout { limit } => {
                write!(f, "kernel did not finish listing tests within {:?}", limit)
            }
            PhaseFailure::SyncExited => f.write_str("kernel exited before finishing test list"),
            PhaseFailure::RunTimeout { limit } => {
                write!(f, "run exceeded its total time limit of {:?}", limit)
            }
        }
    }
}

/// One executed test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub info: TestInfo,
    pub outcome: TestOutcome,
    /// Per-test log file, if the test got far enough to open one.
    pub log_path: Option<PathBuf>,
    pub duration_ms: u64,
}

impl TestRecord {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }
}

/// Aggregate counts over executed tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Count per classifier state, for tests that reported at least once.
    pub per_state: BTreeMap<TestState, usize>,
    pub timed_out: usize,
    pub no_verdict: usize,
    /// Names of every non-passing test, in execution order.
    pub failed_tests: Vec<String>,
}

impl RunSummary {
    pub fn from_records(records: &[TestRecord]) -> Self {
        let mut summary = RunSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            match record.outcome {
                TestOutcome::Classified { state } => {
                    *summary.per_state.entry(state).or_default() += 1;
                }
                TestOutcome::TimedOut { .. } => summary.timed_out += 1,
                TestOutcome::NoVerdict => summary.no_verdict += 1,
            }

            if record.passed() {
                summary.passed += 1;
            } else {
                summary.failed += 1;
                summary.failed_tests.push(record.info.test_name.clone());
            }
        }
        summary
    }

    pub fn count(&self, state: TestState) -> usize {
        self.per_state.get(&state).copied().unwrap_or(0)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub phase: RunPhase,
    pub failure: Option<PhaseFailure>,
    /// Selected test names, in discovery order.
    pub listed: Vec<String>,
    pub tests: Vec<TestRecord>,
    pub summary: RunSummary,
    pub display_only: bool,
    pub log_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Run finished and every executed test passed.
    pub fn success(&self) -> bool {
        self.phase == RunPhase::Done && self.failure.is_none() && self.summary.failed == 0
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    /// Human-readable summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        if self.display_only {
            out.push_str(&format!("Selected tests ({}):\n", self.listed.len()));
            for name in &self.listed {
                out.push_str(&format!("  {}\n", name));
            }
            return out;
        }

        for record in &self.tests {
            let mark = if record.passed() { "✓" } else { "✗" };
            out.push_str(&format!(
                "  {} {} ({}ms) {}\n",
                mark, record.info.test_name, record.duration_ms, record.outcome
            ));
        }
        if !self.tests.is_empty() {
            out.push('\n');
        }

        if let Some(failure) = &self.failure {
            out.push_str(&format!("Run failed: {}\n", failure));
        }

        out.push_str(&format!(
            "Summary: {}/{} tests passed",
            self.summary.passed, self.summary.total
        ));
        if self.summary.timed_out > 0 {
            out.push_str(&format!(", {} timed out", self.summary.timed_out));
        }
        if self.summary.no_verdict > 0 {
            out.push_str(&format!(", {} without verdict", self.summary.no_verdict));
        }
        out.push('\n');

        for state in TestState::ALL {
            let n = self.summary.count(state);
            if n > 0 {
                out.push_str(&format!("  {:<26} {}\n", state.as_str(), n));
            }
        }

        if !self.summary.failed_tests.is_empty() {
            out.push_str("Failed tests:\n");
            for name in &self.summary.failed_tests {
                out.push_str(&format!("  {}\n", name));
            }
        }
        out.push_str(&format!("Logs: {}\n", self.log_dir.display()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, outcome: TestOutcome) -> TestRecord {
        TestRecord {
            info: TestInfo::new(name),
            outcome,
            log_path: None,
            duration_ms: 5,
        }
    }

    fn report(phase: RunPhase, tests: Vec<TestRecord>) -> RunReport {
        RunReport {
            phase,
            failure: None,
            listed: tests.iter().map(|t| t.info.test_name.clone()).collect(),
            summary: RunSummary::from_records(&tests),
            tests,
            display_only: false,
            log_dir: PathBuf::from("logs/run"),
            started_at: Utc::now(),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_summary_counts() {
        let records = vec![
            record("a", TestOutcome::Classified { state: TestState::Success }),
            record("b", TestOutcome::Classified { state: TestState::ErrorDoubleSuccess }),
            record("c", TestOutcome::TimedOut { limit: Duration::from_secs(1) }),
            record("d", TestOutcome::NoVerdict),
            record("e", TestOutcome::Classified { state: TestState::Success }),
        ];
        let summary = RunSummary::from_records(&records);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.count(TestState::Success), 2);
        assert_eq!(summary.count(TestState::ErrorDoubleSuccess), 1);
        assert_eq!(summary.count(TestState::Failure), 0);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.no_verdict, 1);
        assert_eq!(summary.failed_tests, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_report_success_and_exit_code() {
        let ok = report(
            RunPhase::Done,
            vec![record("a", TestOutcome::Classified { state: TestState::Success })],
        );
        assert!(ok.success());
        assert_eq!(ok.exit_code(), 0);

        let failing = report(
            RunPhase::Done,
            vec![record("a", TestOutcome::Classified { state: TestState::Failure })],
        );
        assert_eq!(failing.exit_code(), 1);

        let mut aborted = report(RunPhase::Failed, vec![]);
        aborted.failure = Some(PhaseFailure::BootExited);
        assert!(!aborted.success());
        assert_eq!(aborted.exit_code(), 1);
    }

    #[test]
    fn test_render_text_lists_failures() {
        let r = report(
            RunPhase::Done,
            vec![
                record("good", TestOutcome::Classified { state: TestState::Success }),
                record("bad", TestOutcome::Classified { state: TestState::ErrorFailAfterSuccess }),
            ],
        );
        let text = r.render_text();
        assert!(text.contains("Summary: 1/2 tests passed"));
        assert!(text.contains("ERROR_FAIL_AFTER_SUCCESS"));
        assert!(text.contains("Failed tests:\n  bad\n"));
    }

    #[test]
    fn test_render_display_only() {
        let mut r = report(RunPhase::Done, vec![]);
        r.display_only = true;
        r.listed = vec!["core_y".to_string()];
        assert_eq!(r.render_text(), "Selected tests (1):\n  core_y\n");
    }

    #[test]
    fn test_report_json_has_state_keys() {
        let r = report(
            RunPhase::Done,
            vec![record("a", TestOutcome::Classified { state: TestState::Success })],
        );
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["phase"], "DONE");
        assert_eq!(v["summary"]["per_state"]["SUCCESS"], 1);
        assert_eq!(v["tests"][0]["outcome"]["kind"], "classified");
    }
}
