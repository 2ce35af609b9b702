//! Kernel test-mode harness core.
//!
//! Boots a test-mode kernel, discovers its test list, runs the selected
//! tests one boot at a time, classifies each test from its console reports
//! and leaves a per-run log directory behind:
//!
//! ```text
//! test_framework_logs/<YYYY_MM_DD_HH_MM_SS>/
//!   init.log            discovery session console
//!   exec_log.log        harness trace (written by the CLI's subscriber)
//!   001_<test>.log      one file per executed test
//!   failed_tests.log    every non-passing test log, concatenated
//!   summary.json        serialized RunReport
//! ```

pub mod classifier;
pub mod error;
pub mod fakes;
pub mod filter;
pub mod logs;
pub mod orchestrator;
pub mod pattern;
pub mod protocol;
pub mod report;
pub mod session;
pub mod spec;
pub mod telemetry;

pub use classifier::{classify, Classifier, Report, TestInfo, TestOutcome, TestState};
pub use error::{HarnessError, Result};
pub use filter::{is_selected, TestFilter};
pub use logs::{ClosedLog, RunLogs, ScopedLog};
pub use orchestrator::{DiscoveredTest, Orchestrator};
pub use pattern::{matches, matches_any};
pub use report::{PhaseFailure, RunPhase, RunReport, RunSummary, TestRecord};
pub use session::{KernelLauncher, KernelSession, ProcessLauncher};
pub use spec::{RunSpec, TimingLimits};
pub use telemetry::init_tracing;
