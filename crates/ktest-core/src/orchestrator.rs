//! Run orchestration.
//!
//! Drives one invocation through `BOOTING -> SYNCING -> RUNNING_TESTS -> DONE`
//! (or `FAILED`). The kernel runs a single test per boot, so the run is:
//!
//! 1. a discovery session that boots, collects the test list up to the sync
//!    marker and is told to exit;
//! 2. for every selected test, a fresh session that boots, syncs, receives
//!    the test name and is read until it powers off or its deadline passes.
//!
//! Reads are sequential and bounded by [`tokio::time::timeout_at`]; a
//! deadline only cancels the phase it guards.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::classifier::{Classifier, TestInfo, TestOutcome, TestState};
use crate::error::Result;
use crate::filter::TestFilter;
use crate::logs::{AppendLog, ClosedLog, RunLogs, ScopedLog};
use crate::protocol::{self, Marker, StartDetector, TestEvent};
use crate::report::{PhaseFailure, RunPhase, RunReport, RunSummary, TestRecord};
use crate::session::{KernelLauncher, KernelSession};
use crate::spec::{RunSpec, TimingLimits};

/// Prefix for lines the harness itself writes into kernel logs.
const HARNESS_TAG: &str = "[ktest]";

/// A test name as announced by the kernel's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTest {
    pub name: String,
    pub manual: bool,
}

/// A point in time a phase must finish by.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
    whole_run: bool,
}

impl Deadline {
    fn run(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
            whole_run: true,
        }
    }

    /// Deadline for a phase entered now, capped by the run deadline.
    fn phase(limit: Duration, run: Option<Deadline>) -> Self {
        let own = Self {
            at: Instant::now() + limit,
            limit,
            whole_run: false,
        };
        match run {
            Some(run) if run.at <= own.at => run,
            _ => own,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    fn failure(&self, phase_failure: PhaseFailure) -> PhaseFailure {
        if self.whole_run {
            PhaseFailure::RunTimeout { limit: self.limit }
        } else {
            phase_failure
        }
    }
}

enum Read {
    Line(String),
    Closed,
    Expired,
}

async fn read_line(session: &mut dyn KernelSession, deadline: Deadline) -> Result<Read> {
    match timeout_at(deadline.at, session.next_line()).await {
        Err(_elapsed) => Ok(Read::Expired),
        Ok(line) => Ok(line?.map_or(Read::Closed, Read::Line)),
    }
}

/// Stop a session, logging instead of failing: this runs on cleanup paths.
async fn shutdown(session: &mut dyn KernelSession) {
    if let Err(e) = session.terminate().await {
        warn!(error = %e, "Failed to terminate kernel session");
    }
}

enum SessionStart {
    Ready {
        session: Box<dyn KernelSession>,
        listed: Vec<DiscoveredTest>,
    },
    Failed(PhaseFailure),
}

/// Result of one test execution attempt.
struct Execution {
    record: Option<TestRecord>,
    log: Option<ClosedLog>,
    failure: Option<PhaseFailure>,
}

/// Collects one test's output, opening its scoped log at the start marker.
///
/// Lines seen before the log exists are kept and written first once it is
/// opened, so nothing the kernel printed after dispatch is lost.
struct TestCapture<'a> {
    logs: &'a RunLogs,
    info: TestInfo,
    log: Option<ScopedLog>,
    pending: Vec<String>,
}

impl<'a> TestCapture<'a> {
    fn new(logs: &'a RunLogs, info: TestInfo) -> Self {
        Self {
            logs,
            info,
            log: None,
            pending: Vec::new(),
        }
    }

    fn started(&self) -> bool {
        self.log.is_some()
    }

    fn take_or_open(&mut self) -> Result<ScopedLog> {
        let mut log = match self.log.take() {
            Some(log) => log,
            None => self.logs.scoped_log(&self.info)?,
        };
        for line in self.pending.drain(..) {
            log.write_line(&line)?;
        }
        Ok(log)
    }

    fn start(&mut self) -> Result<()> {
        let log = self.take_or_open()?;
        self.log = Some(log);
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<()> {
        match self.log.as_mut() {
            Some(log) => log.write_line(line),
            None => {
                self.pending.push(line.to_string());
                Ok(())
            }
        }
    }

    fn finish(mut self) -> Result<ClosedLog> {
        self.take_or_open()?.close()
    }
}

/// Drives one harness invocation.
pub struct Orchestrator {
    spec: RunSpec,
    limits: TimingLimits,
    launcher: Arc<dyn KernelLauncher>,
    logs: RunLogs,
    filter: TestFilter,
    phase: RunPhase,
}

impl Orchestrator {
    pub fn new(
        spec: RunSpec,
        limits: TimingLimits,
        launcher: Arc<dyn KernelLauncher>,
        logs: RunLogs,
    ) -> Self {
        let filter = spec.test_filter();
        Self {
            spec,
            limits,
            launcher,
            logs,
            filter,
            phase: RunPhase::Booting,
        }
    }

    /// Whether a discovered test is scheduled for this run.
    ///
    /// Manual tests need `include_manual` or an inclusion pattern that
    /// matches them.
    pub fn is_scheduled(&self, test: &DiscoveredTest) -> bool {
        if !self.filter.is_selected(&test.name) {
            return false;
        }
        !test.manual || self.spec.include_manual || self.filter.explicitly_included(&test.name)
    }

    /// Execute the run to completion.
    ///
    /// Returns `Err` only for fatal resource errors (log files, kernel
    /// launch, kernel I/O). Phase timeouts and test failures end up in the
    /// returned [`RunReport`].
    pub async fn run(mut self) -> Result<RunReport> {
        let started = Instant::now();
        let started_at = Utc::now();
        let run_deadline = self.limits.run.map(Deadline::run);

        let mut init_log = self.logs.init_log()?;
        init_log.write_line(&format!(
            "{} kernel: {}",
            HARNESS_TAG,
            self.spec.kernel_path.display()
        ))?;
        info!(
            kernel = %self.spec.kernel_path.display(),
            log_dir = %self.logs.dir().display(),
            "Starting kernel test run"
        );

        let listed = match self.boot_and_sync(Some(&mut init_log), run_deadline).await? {
            SessionStart::Ready {
                mut session,
                listed,
            } => {
                if let Err(e) = session.send_line(protocol::EXIT_COMMAND).await {
                    warn!(error = %e, "Kernel did not accept exit command");
                }
                shutdown(session.as_mut()).await;
                listed
            }
            SessionStart::Failed(failure) => {
                self.record_phase_failure(&mut init_log, &failure)?;
                return self.finish(
                    started,
                    started_at,
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Some(failure),
                );
            }
        };

        let selected = self.select(&listed, &mut init_log)?;

        if self.spec.display_only {
            self.phase = RunPhase::Done;
            info!(selected = selected.len(), "Display-only run, no tests executed");
            return self.finish(started, started_at, selected, Vec::new(), Vec::new(), None);
        }

        self.phase = RunPhase::RunningTests;
        let mut records = Vec::new();
        let mut failed_logs = Vec::new();
        let mut failure = None;

        for name in &selected {
            if let Some(run) = run_deadline.filter(Deadline::expired) {
                failure = Some(PhaseFailure::RunTimeout { limit: run.limit });
                break;
            }

            let execution = self.execute_test(name, &mut init_log, run_deadline).await?;
            if let Some(record) = execution.record {
                if !record.passed() {
                    failed_logs.extend(execution.log);
                }
                records.push(record);
            }
            if let Some(f) = execution.failure {
                failure = Some(f);
                break;
            }
        }

        if let Some(f) = &failure {
            self.record_phase_failure(&mut init_log, f)?;
        }
        self.logs.concatenate_failed_logs(&failed_logs)?;

        self.finish(started, started_at, selected, records, failed_logs, failure)
    }

    /// Apply selection to the discovered list, in discovery order.
    fn select(&self, listed: &[DiscoveredTest], init_log: &mut AppendLog) -> Result<Vec<String>> {
        let mut selected: Vec<String> = Vec::new();
        for test in listed {
            let scheduled = self.is_scheduled(test);
            debug!(test = %test.name, manual = test.manual, scheduled, "Discovered test");
            if !scheduled {
                continue;
            }
            if selected.contains(&test.name) {
                warn!(test = %test.name, "Kernel listed the same test twice");
                continue;
            }
            selected.push(test.name.clone());
        }

        init_log.write_line(&format!(
            "{} discovered {} test(s), {} selected",
            HARNESS_TAG,
            listed.len(),
            selected.len()
        ))?;
        info!(discovered = listed.len(), selected = selected.len(), "Test discovery complete");
        Ok(selected)
    }

    fn record_phase_failure(&mut self, init_log: &mut AppendLog, failure: &PhaseFailure) -> Result<()> {
        error!(phase = %self.phase, %failure, "Run failed");
        init_log.write_line(&format!(
            "{} {} failed: {}",
            HARNESS_TAG, self.phase, failure
        ))?;
        self.phase = RunPhase::Failed;
        Ok(())
    }

    fn finish(
        mut self,
        started: Instant,
        started_at: chrono::DateTime<Utc>,
        listed: Vec<String>,
        tests: Vec<TestRecord>,
        failed_logs: Vec<ClosedLog>,
        failure: Option<PhaseFailure>,
    ) -> Result<RunReport> {
        self.phase = if failure.is_some() {
            RunPhase::Failed
        } else {
            RunPhase::Done
        };

        let summary = RunSummary::from_records(&tests);
        let report = RunReport {
            phase: self.phase,
            failure,
            listed,
            tests,
            summary,
            display_only: self.spec.display_only,
            log_dir: self.logs.dir().to_path_buf(),
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.logs.write_summary(&report)?;
        info!(
            phase = %report.phase,
            passed = report.summary.passed,
            failed = report.summary.failed,
            failed_logs = failed_logs.len(),
            "Kernel test run finished"
        );
        Ok(report)
    }

    /// Launch a kernel and wait for boot completion and the sync marker.
    ///
    /// Console lines go to `init_log` when given (discovery), otherwise to
    /// the debug trace. On failure the session is already terminated.
    async fn boot_and_sync(
        &mut self,
        mut init_log: Option<&mut AppendLog>,
        run_deadline: Option<Deadline>,
    ) -> Result<SessionStart> {
        self.phase = RunPhase::Booting;
        let mut session = self.launcher.launch().await?;

        let deadline = Deadline::phase(self.limits.boot, run_deadline);
        loop {
            let line = match read_line(session.as_mut(), deadline).await {
                Ok(Read::Line(line)) => line,
                Ok(Read::Closed) => {
                    shutdown(session.as_mut()).await;
                    return Ok(SessionStart::Failed(PhaseFailure::BootExited));
                }
                Ok(Read::Expired) => {
                    shutdown(session.as_mut()).await;
                    let failure = deadline.failure(PhaseFailure::BootTimeout {
                        limit: deadline.limit,
                    });
                    return Ok(SessionStart::Failed(failure));
                }
                Err(e) => {
                    shutdown(session.as_mut()).await;
                    return Err(e);
                }
            };
            console_line(&mut init_log, &line)?;
            if protocol::parse_line(&line) == Marker::BootComplete {
                break;
            }
        }
        debug!("Kernel boot complete");

        self.phase = RunPhase::Syncing;
        let deadline = Deadline::phase(self.limits.sync, run_deadline);
        let mut listed = Vec::new();
        loop {
            let line = match read_line(session.as_mut(), deadline).await {
                Ok(Read::Line(line)) => line,
                Ok(Read::Closed) => {
                    shutdown(session.as_mut()).await;
                    return Ok(SessionStart::Failed(PhaseFailure::SyncExited));
                }
                Ok(Read::Expired) => {
                    shutdown(session.as_mut()).await;
                    let failure = deadline.failure(PhaseFailure::SyncTimeout {
                        limit: deadline.limit,
                    });
                    return Ok(SessionStart::Failed(failure));
                }
                Err(e) => {
                    shutdown(session.as_mut()).await;
                    return Err(e);
                }
            };
            console_line(&mut init_log, &line)?;
            match protocol::parse_line(&line) {
                Marker::TestListed { name, manual } => listed.push(DiscoveredTest { name, manual }),
                Marker::ListEnd => break,
                _ => {}
            }
        }
        debug!(listed = listed.len(), "Kernel synced");

        Ok(SessionStart::Ready { session, listed })
    }

    /// Run one test in its own kernel session.
    async fn execute_test(
        &mut self,
        name: &str,
        init_log: &mut AppendLog,
        run_deadline: Option<Deadline>,
    ) -> Result<Execution> {
        let started = Instant::now();
        info!(test = %name, "Running test");

        let mut session = match self.boot_and_sync(None, run_deadline).await? {
            SessionStart::Ready { session, .. } => session,
            SessionStart::Failed(failure) => {
                init_log.write_line(&format!(
                    "{} kernel session for test {} did not start",
                    HARNESS_TAG, name
                ))?;
                return Ok(Execution {
                    record: None,
                    log: None,
                    failure: Some(failure),
                });
            }
        };

        self.phase = RunPhase::RunningTests;
        if let Err(e) = session.send_line(name).await {
            shutdown(session.as_mut()).await;
            return Err(e);
        }

        let info = TestInfo::new(name);
        let mut capture = TestCapture::new(&self.logs, info.clone());
        let mut detector = StartDetector::new();
        let mut announced = false;
        let mut classifier = Classifier::new();
        let deadline = Deadline::phase(self.limits.test, run_deadline);

        let expired = loop {
            let line = match read_line(session.as_mut(), deadline).await {
                Ok(Read::Line(line)) => line,
                Ok(Read::Closed) => break false,
                Ok(Read::Expired) => break true,
                Err(e) => {
                    shutdown(session.as_mut()).await;
                    return Err(e);
                }
            };

            match detector.push(&line) {
                None => {}
                Some(TestEvent::Started(reported)) => {
                    if announced {
                        warn!(test = %name, reported = %reported, "Repeated test start marker");
                        capture.line(protocol::TEST_START)?;
                        capture.line(&reported)?;
                        continue;
                    }
                    announced = true;
                    if reported != name {
                        warn!(test = %name, reported = %reported, "Kernel started a different test");
                    }
                    capture.start()?;
                    capture.line(protocol::TEST_START)?;
                    capture.line(&reported)?;
                }
                Some(TestEvent::Outcome { report, message }) => {
                    if !capture.started() {
                        warn!(test = %name, "Outcome reported before test start");
                        capture.start()?;
                    }
                    capture.line(&line)?;
                    let previous = classifier.state();
                    let state = classifier.feed(report);
                    if state.is_error() && !previous.is_error() {
                        warn!(test = %name, %state, %message, "Kernel protocol violation");
                    } else {
                        debug!(test = %name, %state, %message, "Test reported");
                    }
                }
                Some(TestEvent::Output(text)) => capture.line(&text)?,
            }
        };

        shutdown(session.as_mut()).await;

        let state = classifier.state();
        let outcome = match (expired, state) {
            (true, TestState::Unknown) => TestOutcome::TimedOut {
                limit: deadline.limit,
            },
            (false, TestState::Unknown) => TestOutcome::NoVerdict,
            (_, state) => TestOutcome::Classified { state },
        };

        if expired {
            if state == TestState::Unknown {
                warn!(test = %name, limit = ?deadline.limit, "Test timed out");
            } else {
                warn!(test = %name, "Kernel did not power off after reporting");
            }
            capture.line(&format!(
                "{} session stopped after {:?} without kernel shutdown",
                HARNESS_TAG, deadline.limit
            ))?;
        }
        if !capture.started() {
            capture.line(&format!("{} kernel never started the test", HARNESS_TAG))?;
        }
        match outcome {
            TestOutcome::NoVerdict => {
                capture.line(&format!("{} kernel exited without a verdict", HARNESS_TAG))?
            }
            TestOutcome::Classified { state } if state.is_error() => capture.line(&format!(
                "{} protocol violation: {} after {} reports",
                HARNESS_TAG,
                state,
                classifier.reports()
            ))?,
            _ => {}
        }

        let closed = capture.finish()?;
        let record = TestRecord {
            info,
            outcome,
            log_path: Some(closed.path.clone()),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if record.passed() {
            info!(test = %name, "Test passed");
        } else {
            info!(test = %name, %outcome, "Test failed");
        }

        let failure = (expired && deadline.whole_run)
            .then_some(PhaseFailure::RunTimeout { limit: deadline.limit });

        Ok(Execution {
            record: Some(record),
            log: Some(closed),
            failure,
        })
    }
}

fn console_line(init_log: &mut Option<&mut AppendLog>, line: &str) -> Result<()> {
    match init_log {
        Some(log) => log.write_line(line),
        None => {
            debug!(console = %line, "Kernel boot output");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_phase_deadline_capped_by_run_deadline() {
        let run = Deadline::run(Duration::from_secs(5));
        let phase = Deadline::phase(Duration::from_secs(60), Some(run));
        assert!(phase.whole_run);
        assert_eq!(phase.limit, Duration::from_secs(5));

        let phase = Deadline::phase(Duration::from_secs(1), Some(run));
        assert!(!phase.whole_run);
        assert_eq!(phase.limit, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_failure_kind() {
        let own = Deadline::phase(Duration::from_secs(1), None);
        assert_eq!(
            own.failure(PhaseFailure::BootTimeout { limit: own.limit }),
            PhaseFailure::BootTimeout {
                limit: Duration::from_secs(1)
            }
        );

        let run = Deadline::run(Duration::from_secs(2));
        assert_eq!(
            run.failure(PhaseFailure::SyncExited),
            PhaseFailure::RunTimeout {
                limit: Duration::from_secs(2)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let d = Deadline::phase(Duration::from_secs(1), None);
        assert!(!d.expired());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(d.expired());
    }
}
