//! Run parameters and timing limits.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::filter::TestFilter;

/// Resolved, validated description of one harness invocation.
///
/// Immutable once built; owned by the orchestrator for the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    /// File that boots the kernel built in test mode.
    pub kernel_path: PathBuf,

    /// Inclusion patterns (`*` wildcard).
    pub filters: Vec<String>,

    /// Exclusion patterns (`*` wildcard).
    pub blocks: Vec<String>,

    /// List the selected tests instead of running them.
    pub display_only: bool,

    /// Echo kernel output to the console while it is logged.
    pub verbose: bool,

    /// Also schedule tests the kernel reports as manual.
    pub include_manual: bool,
}

impl RunSpec {
    /// Build a spec, trimming patterns and rejecting malformed ones.
    ///
    /// Patterns must be non-empty after trimming and must not contain
    /// whitespace; test names never do.
    pub fn new(
        kernel_path: PathBuf,
        filters: Vec<String>,
        blocks: Vec<String>,
        display_only: bool,
        verbose: bool,
    ) -> Result<Self> {
        Ok(Self {
            kernel_path,
            filters: normalize_patterns(filters)?,
            blocks: normalize_patterns(blocks)?,
            display_only,
            verbose,
            include_manual: false,
        })
    }

    /// Also run manual tests.
    pub fn with_manual(mut self, include_manual: bool) -> Self {
        self.include_manual = include_manual;
        self
    }

    /// The selection filter for this run.
    pub fn test_filter(&self) -> TestFilter {
        TestFilter::new(self.filters.clone(), self.blocks.clone())
    }
}

fn normalize_patterns(patterns: Vec<String>) -> Result<Vec<String>> {
    patterns
        .into_iter()
        .map(|raw| {
            let pattern = raw.trim();
            if pattern.is_empty() {
                return Err(HarnessError::InvalidSpec("empty test pattern".to_string()));
            }
            if pattern.chars().any(char::is_whitespace) {
                return Err(HarnessError::InvalidSpec(format!(
                    "test pattern '{}' contains whitespace",
                    pattern
                )));
            }
            Ok(pattern.to_string())
        })
        .collect()
}

/// Deadlines for each phase, measured from phase entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingLimits {
    /// Launch until the boot-complete signal.
    pub boot: Duration,

    /// Boot-complete until the sync marker.
    pub sync: Duration,

    /// Test dispatch until the kernel session ends.
    pub test: Duration,

    /// Whole invocation. `None` means unbounded.
    pub run: Option<Duration>,
}

impl Default for TimingLimits {
    fn default() -> Self {
        Self {
            boot: Duration::from_secs(30),
            sync: Duration::from_secs(10),
            test: Duration::from_secs(60),
            run: None,
        }
    }
}
