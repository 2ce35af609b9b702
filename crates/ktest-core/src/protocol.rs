//! Console marker protocol spoken by the kernel in test mode.
//!
//! One test runs per boot. The kernel lists its tests, waits for a command
//! on its console input, runs the named test and powers off:
//!
//! ```text
//! Displaying list of all tests:          <- boot complete
//! [TEST] [TESTNAME] buddy_pmm_alloc
//! [TEST] [MANUAL] [TESTNAME] page_fault
//! [TEST] [LISTEND]                       <- sync, kernel reads a command
//! Running test:                          <- test start (name on next line)
//! buddy_pmm_alloc
//! ...test output...
//! [TEST] [SUCCESS] Test passed...        <- or [TEST] [FAIL] ...
//! ```

use crate::classifier::Report;

pub const BOOT_COMPLETE: &str = "Displaying list of all tests:";
pub const TEST_PREFIX: &str = "[TEST] ";
pub const TEST_NAME_TAG: &str = "[TESTNAME] ";
pub const MANUAL_TAG: &str = "[MANUAL] ";
pub const LIST_END: &str = "[LISTEND]";
pub const SUCCESS_TAG: &str = "[SUCCESS]";
pub const FAIL_TAG: &str = "[FAIL]";
pub const TEST_START: &str = "Running test:";

/// Command that makes the kernel shut down without running anything.
pub const EXIT_COMMAND: &str = "exit";

/// One classified console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    BootComplete,
    TestListed { name: String, manual: bool },
    ListEnd,
    StartBanner,
    Outcome { report: Report, message: String },
    Output(String),
}

/// Strip the line terminator, including serial-console `\r`.
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Classify a single console line.
pub fn parse_line(line: &str) -> Marker {
    let line = trim_line_end(line);

    if line == BOOT_COMPLETE {
        return Marker::BootComplete;
    }
    if line == TEST_START {
        return Marker::StartBanner;
    }

    let Some(rest) = line.strip_prefix(TEST_PREFIX) else {
        return Marker::Output(line.to_string());
    };

    if rest == LIST_END {
        return Marker::ListEnd;
    }
    if let Some(name) = rest.strip_prefix(TEST_NAME_TAG) {
        return listed(name, false, line);
    }
    if let Some(name) = rest
        .strip_prefix(MANUAL_TAG)
        .and_then(|r| r.strip_prefix(TEST_NAME_TAG))
    {
        return listed(name, true, line);
    }
    if let Some(message) = rest.strip_prefix(SUCCESS_TAG) {
        return Marker::Outcome {
            report: Report::Success,
            message: message.trim().to_string(),
        };
    }
    if let Some(message) = rest.strip_prefix(FAIL_TAG) {
        return Marker::Outcome {
            report: Report::Failure,
            message: message.trim().to_string(),
        };
    }

    Marker::Output(line.to_string())
}

fn listed(name: &str, manual: bool, line: &str) -> Marker {
    let name = name.trim();
    if name.is_empty() {
        return Marker::Output(line.to_string());
    }
    Marker::TestListed {
        name: name.to_string(),
        manual,
    }
}

/// Event produced by [`StartDetector`] once the two-line start marker has
/// been folded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestEvent {
    Started(String),
    Outcome { report: Report, message: String },
    Output(String),
}

/// Turns `Running test:` + `<name>` into a single [`TestEvent::Started`].
#[derive(Debug, Default)]
pub struct StartDetector {
    awaiting_name: bool,
}

impl StartDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw console line. The banner line itself yields `None`.
    ///
    /// While the name is pending, marker lines (an interleaved outcome from
    /// the other console pipe, say) are reported as usual and the next plain
    /// non-empty line is still taken as the name.
    pub fn push(&mut self, line: &str) -> Option<TestEvent> {
        match parse_line(line) {
            Marker::StartBanner => {
                self.awaiting_name = true;
                None
            }
            Marker::Outcome { report, message } => Some(TestEvent::Outcome { report, message }),
            Marker::Output(text) if self.awaiting_name && !text.trim().is_empty() => {
                self.awaiting_name = false;
                Some(TestEvent::Started(text.trim().to_string()))
            }
            _ => Some(TestEvent::Output(trim_line_end(line).to_string())),
        }
    }
}
