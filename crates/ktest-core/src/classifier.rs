//! Per-test outcome classification.
//!
//! The kernel's self-reports are untrusted: it may report twice or report
//! contradicting results. Every anomalous sequence ends in its own `Error*`
//! state, and error states are absorbing.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of one test unit as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestInfo {
    pub test_name: String,
}

impl TestInfo {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
        }
    }
}

impl fmt::Display for TestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.test_name)
    }
}

/// A single report event from the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Report {
    Success,
    Failure,
}

/// Classification of one test's report sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestState {
    #[default]
    Unknown,
    Success,
    Failure,
    ErrorDoubleSuccess,
    ErrorFailAfterSuccess,
    ErrorFailAfterFail,
    ErrorSuccessAfterFail,
}

impl TestState {
    /// All states, in declaration order.
    pub const ALL: [TestState; 7] = [
        TestState::Unknown,
        TestState::Success,
        TestState::Failure,
        TestState::ErrorDoubleSuccess,
        TestState::ErrorFailAfterSuccess,
        TestState::ErrorFailAfterFail,
        TestState::ErrorSuccessAfterFail,
    ];

    /// Apply one report event.
    pub fn apply(self, report: Report) -> TestState {
        use Report as R;
        use TestState as S;

        match (self, report) {
            (S::Unknown, R::Success) => S::Success,
            (S::Unknown, R::Failure) => S::Failure,
            (S::Success, R::Success) => S::ErrorDoubleSuccess,
            (S::Success, R::Failure) => S::ErrorFailAfterSuccess,
            (S::Failure, R::Failure) => S::ErrorFailAfterFail,
            (S::Failure, R::Success) => S::ErrorSuccessAfterFail,
            (error, _) => error,
        }
    }

    /// Protocol violation states.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            TestState::ErrorDoubleSuccess
                | TestState::ErrorFailAfterSuccess
                | TestState::ErrorFailAfterFail
                | TestState::ErrorSuccessAfterFail
        )
    }

    pub fn is_success(self) -> bool {
        self == TestState::Success
    }

    /// Stable upper-case name, as used in summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            TestState::Unknown => "UNKNOWN",
            TestState::Success => "SUCCESS",
            TestState::Failure => "FAILURE",
            TestState::ErrorDoubleSuccess => "ERROR_DOUBLE_SUCCESS",
            TestState::ErrorFailAfterSuccess => "ERROR_FAIL_AFTER_SUCCESS",
            TestState::ErrorFailAfterFail => "ERROR_FAIL_AFTER_FAIL",
            TestState::ErrorSuccessAfterFail => "ERROR_SUCCESS_AFTER_FAIL",
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Folds report events for one test.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    state: TestState,
    reports: usize,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one report; returns the new state.
    pub fn feed(&mut self, report: Report) -> TestState {
        self.reports += 1;
        self.state = self.state.apply(report);
        self.state
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    /// Number of reports fed so far, including ignored ones.
    pub fn reports(&self) -> usize {
        self.reports
    }
}

/// Classify a whole report sequence.
pub fn classify<I: IntoIterator<Item = Report>>(reports: I) -> TestState {
    reports
        .into_iter()
        .fold(TestState::Unknown, |state, report| state.apply(report))
}

/// Final verdict for one executed test.
///
/// Timeouts and silent exits are failure classes of their own, not
/// [`TestState`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestOutcome {
    /// The kernel reported at least one result.
    Classified { state: TestState },

    /// No result before the per-test (or whole-run) deadline.
    TimedOut { limit: Duration },

    /// The kernel exited without reporting a result.
    NoVerdict,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Classified { state } if state.is_success())
    }

    /// The classifier state, if any report arrived.
    pub fn state(&self) -> Option<TestState> {
        match self {
            TestOutcome::Classified { state } => Some(*state),
            _ => None,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Classified { state } => write!(f, "{}", state),
            TestOutcome::TimedOut { limit } => write!(f, "TIMEOUT ({:?})", limit),
            TestOutcome::NoVerdict => f.write_str("NO_VERDICT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Report::{Failure as F, Success as S};

    #[test]
    fn test_transition_table() {
        let cases = [
            (TestState::Unknown, S, TestState::Success),
            (TestState::Unknown, F, TestState::Failure),
            (TestState::Success, S, TestState::ErrorDoubleSuccess),
            (TestState::Success, F, TestState::ErrorFailAfterSuccess),
            (TestState::Failure, F, TestState::ErrorFailAfterFail),
            (TestState::Failure, S, TestState::ErrorSuccessAfterFail),
        ];
        for (from, report, to) in cases {
            assert_eq!(from.apply(report), to, "{:?} + {:?}", from, report);
        }
    }

    #[test]
    fn test_error_states_are_absorbing() {
        for state in TestState::ALL.into_iter().filter(|s| s.is_error()) {
            assert_eq!(state.apply(S), state);
            assert_eq!(state.apply(F), state);
        }
    }

    #[test]
    fn test_classify_sequences() {
        assert_eq!(classify(Vec::new()), TestState::Unknown);
        assert_eq!(classify([S]), TestState::Success);
        assert_eq!(classify([S, S]), TestState::ErrorDoubleSuccess);
        assert_eq!(classify([S, F]), TestState::ErrorFailAfterSuccess);
        assert_eq!(classify([F, S, S, F]), TestState::ErrorSuccessAfterFail);
    }

    #[test]
    fn test_classifier_counts_reports() {
        let mut classifier = Classifier::new();
        assert_eq!(classifier.state(), TestState::Unknown);
        classifier.feed(F);
        classifier.feed(F);
        classifier.feed(S);
        assert_eq!(classifier.state(), TestState::ErrorFailAfterFail);
        assert_eq!(classifier.reports(), 3);
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(TestState::Unknown < TestState::Success);
        assert!(TestState::Failure < TestState::ErrorDoubleSuccess);
        let mut sorted = TestState::ALL;
        sorted.sort();
        assert_eq!(sorted, TestState::ALL);
    }

    #[test]
    fn test_state_serializes_upper_case() {
        let json = serde_json::to_string(&TestState::ErrorFailAfterSuccess).unwrap();
        assert_eq!(json, "\"ERROR_FAIL_AFTER_SUCCESS\"");
        assert_eq!(TestState::ErrorFailAfterSuccess.to_string(), "ERROR_FAIL_AFTER_SUCCESS");
    }

    #[test]
    fn test_outcome_passed() {
        assert!(TestOutcome::Classified { state: TestState::Success }.passed());
        assert!(!TestOutcome::Classified { state: TestState::ErrorDoubleSuccess }.passed());
        assert!(!TestOutcome::TimedOut { limit: Duration::from_secs(1) }.passed());
        assert!(!TestOutcome::NoVerdict.passed());
        assert_eq!(TestOutcome::NoVerdict.state(), None);
    }
}
