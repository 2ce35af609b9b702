//! In-memory kernel fake (testing only)
//!
//! [`FakeKernel`] implements [`KernelLauncher`] and speaks the console
//! protocol from [`crate::protocol`] without booting anything, with
//! scripted per-test behaviour and knobs for boot/sync failures.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{HarnessError, Result};
use crate::protocol::{self, EXIT_COMMAND};
use crate::session::{KernelLauncher, KernelSession};

/// How a fake test reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    Pass,
    Fail,
    DoubleSuccess,
    SuccessThenFail,
    FailThenFail,
    FailThenSuccess,
    /// Start, print output, then never report nor exit.
    Hang,
    /// Report success, then never exit.
    HangAfterSuccess,
    /// Start, print output, then power off without a verdict.
    ExitSilently,
    /// Emit these raw lines after the start marker, then exit.
    Script(Vec<String>),
    /// Emit only these raw lines, with no start marker of its own, then exit.
    Raw(Vec<String>),
}

/// How far a fake boot gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootMode {
    #[default]
    Normal,
    /// Never reaches the test module.
    HangBeforeBoot,
    /// Powers off before reaching the test module.
    ExitBeforeBoot,
    /// Reaches the test module but never finishes the list.
    HangBeforeListEnd,
}

#[derive(Debug, Clone)]
struct FakeTest {
    name: String,
    manual: bool,
    output: Vec<String>,
    behavior: Behavior,
}

#[derive(Debug, Default)]
struct Recorded {
    launches: usize,
    commands: Vec<String>,
}

/// Scriptable fake kernel.
#[derive(Debug, Default)]
pub struct FakeKernel {
    tests: Vec<FakeTest>,
    boot_mode: BootMode,
    fail_launches_after: Option<usize>,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an automatic test.
    pub fn with_test(mut self, name: &str, behavior: Behavior) -> Self {
        self.tests.push(FakeTest {
            name: name.to_string(),
            manual: false,
            output: Vec::new(),
            behavior,
        });
        self
    }

    /// Register a manual test.
    pub fn with_manual_test(mut self, name: &str, behavior: Behavior) -> Self {
        self.tests.push(FakeTest {
            name: name.to_string(),
            manual: true,
            output: Vec::new(),
            behavior,
        });
        self
    }

    /// Lines the named test prints before reporting.
    pub fn with_output(mut self, name: &str, lines: &[&str]) -> Self {
        if let Some(test) = self.tests.iter_mut().find(|t| t.name == name) {
            test.output = lines.iter().map(|l| l.to_string()).collect();
        }
        self
    }

    pub fn with_boot_mode(mut self, mode: BootMode) -> Self {
        self.boot_mode = mode;
        self
    }

    /// Let the first `n` launches succeed and fail every later one.
    pub fn fail_launches_after(mut self, n: usize) -> Self {
        self.fail_launches_after = Some(n);
        self
    }

    /// Number of launch attempts so far.
    pub fn launches(&self) -> usize {
        self.recorded.lock().unwrap().launches
    }

    /// Every command line received, across all sessions.
    pub fn commands(&self) -> Vec<String> {
        self.recorded.lock().unwrap().commands.clone()
    }

    fn boot_lines(&self) -> (VecDeque<String>, Tail) {
        let mut lines: VecDeque<String> = [
            "AlkOS: booting in test mode",
            "memory map initialised",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        match self.boot_mode {
            BootMode::HangBeforeBoot => return (lines, Tail::Hang),
            BootMode::ExitBeforeBoot => return (lines, Tail::Eof),
            BootMode::Normal | BootMode::HangBeforeListEnd => {}
        }

        lines.push_back(protocol::BOOT_COMPLETE.to_string());
        for test in self.tests.iter().filter(|t| !t.manual) {
            lines.push_back(format!("[TEST] [TESTNAME] {}", test.name));
        }
        if self.boot_mode == BootMode::HangBeforeListEnd {
            return (lines, Tail::Hang);
        }

        lines.push_back("Displaying list of all manual tests:".to_string());
        for test in self.tests.iter().filter(|t| t.manual) {
            lines.push_back(format!("[TEST] [MANUAL] [TESTNAME] {}", test.name));
        }
        lines.push_back("[TEST] [LISTEND]".to_string());
        lines.push_back(
            "Provide test name for framework or simply type \"exit\" to quit...".to_string(),
        );
        (lines, Tail::Hang)
    }
}

#[async_trait]
impl KernelLauncher for FakeKernel {
    async fn launch(&self) -> Result<Box<dyn KernelSession>> {
        let launches = {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.launches += 1;
            recorded.launches
        };
        if matches!(self.fail_launches_after, Some(n) if launches > n) {
            return Err(HarnessError::Launch {
                path: PathBuf::from("fake-kernel"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "launch refused"),
            });
        }

        let (queue, tail) = self.boot_lines();
        Ok(Box::new(FakeSession {
            tests: self.tests.clone(),
            queue,
            tail,
            awaiting_command: self.boot_mode == BootMode::Normal,
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

/// What a session does once its queued lines run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Eof,
    Hang,
}

struct FakeSession {
    tests: Vec<FakeTest>,
    queue: VecDeque<String>,
    tail: Tail,
    awaiting_command: bool,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeSession {
    fn run_test(&mut self, name: &str) {
        let Some(test) = self.tests.iter().find(|t| t.name == name).cloned() else {
            self.queue
                .push_back("[TEST] [FAIL] Test not found...".to_string());
            self.tail = Tail::Eof;
            return;
        };

        if let Behavior::Raw(lines) = &test.behavior {
            self.queue.extend(lines.iter().cloned());
            self.tail = Tail::Eof;
            return;
        }

        self.queue.push_back(protocol::TEST_START.to_string());
        self.queue.push_back(test.name.clone());
        self.queue.extend(test.output.iter().cloned());

        const OK: &str = "[TEST] [SUCCESS] Test passed...";
        const FAIL: &str = "[TEST] [FAIL] Test failed on some EXPECT_* checks...";
        let (reports, tail): (Vec<String>, Tail) = match test.behavior {
            Behavior::Pass => (vec![OK.into()], Tail::Eof),
            Behavior::Fail => (vec![FAIL.into()], Tail::Eof),
            Behavior::DoubleSuccess => (vec![OK.into(), OK.into()], Tail::Eof),
            Behavior::SuccessThenFail => (vec![OK.into(), FAIL.into()], Tail::Eof),
            Behavior::FailThenFail => (vec![FAIL.into(), FAIL.into()], Tail::Eof),
            Behavior::FailThenSuccess => (vec![FAIL.into(), OK.into()], Tail::Eof),
            Behavior::Hang => (Vec::new(), Tail::Hang),
            Behavior::HangAfterSuccess => (vec![OK.into()], Tail::Hang),
            Behavior::ExitSilently => (Vec::new(), Tail::Eof),
            Behavior::Script(lines) | Behavior::Raw(lines) => (lines, Tail::Eof),
        };
        self.queue.extend(reports);
        self.tail = tail;
    }
}

#[async_trait]
impl KernelSession for FakeSession {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.queue.pop_front() {
            return Ok(Some(line));
        }
        match self.tail {
            Tail::Eof => Ok(None),
            Tail::Hang => std::future::pending().await,
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.recorded.lock().unwrap().commands.push(line.to_string());
        if !self.awaiting_command {
            return Ok(());
        }
        self.awaiting_command = false;

        if line == EXIT_COMMAND {
            self.queue.push_back("Kernel shutdown on test...".to_string());
            self.tail = Tail::Eof;
        } else {
            self.run_test(line);
        }
        Ok(())
    }

    async fn terminate(&mut self) -> Result<()> {
        self.queue.clear();
        self.tail = Tail::Eof;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(session: &mut Box<dyn KernelSession>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = session.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_fake_lists_tests_and_runs_one() {
        let kernel = FakeKernel::new()
            .with_test("alpha", Behavior::Pass)
            .with_manual_test("manual_beta", Behavior::Fail)
            .with_output("alpha", &["checking alpha"]);

        let mut session = kernel.launch().await.unwrap();
        let mut seen = Vec::new();
        loop {
            let line = session.next_line().await.unwrap().unwrap();
            let done = line == "[TEST] [LISTEND]";
            seen.push(line);
            if done {
                break;
            }
        }
        assert!(seen.contains(&"[TEST] [TESTNAME] alpha".to_string()));
        assert!(seen.contains(&"[TEST] [MANUAL] [TESTNAME] manual_beta".to_string()));

        session.send_line("alpha").await.unwrap();
        let rest = drain(&mut session).await;
        assert_eq!(
            &rest[1..],
            &[
                "Running test:".to_string(),
                "alpha".to_string(),
                "checking alpha".to_string(),
                "[TEST] [SUCCESS] Test passed...".to_string(),
            ]
        );
        assert_eq!(kernel.launches(), 1);
        assert_eq!(kernel.commands(), vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_fake_launch_failure() {
        let kernel = FakeKernel::new().fail_launches_after(1);
        assert!(kernel.launch().await.is_ok());
        assert!(kernel.launch().await.is_err());
        assert_eq!(kernel.launches(), 2);
    }

    #[tokio::test]
    async fn test_fake_exit_before_boot() {
        let kernel = FakeKernel::new()
            .with_test("alpha", Behavior::Pass)
            .with_boot_mode(BootMode::ExitBeforeBoot);
        let mut session = kernel.launch().await.unwrap();
        let lines = drain(&mut session).await;
        assert!(!lines.iter().any(|l| l == protocol::BOOT_COMPLETE));
    }
}
