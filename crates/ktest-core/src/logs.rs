//! Run-scoped log artifacts.
//!
//! Every invocation gets its own directory named after its start time:
//!
//! ```text
//! <root>/2026_10_18_14_03_59/
//!     init.log           discovery and pre-test diagnostics
//!     exec_log.log       whole-run tracing output (written by the subscriber)
//!     001_<test>.log     one file per executed test
//!     failed_tests.log   every non-success test log, framed
//!     summary.json       machine-readable run report
//! ```
//!
//! Per-test logs are handed out as [`ScopedLog`]s. A scoped log is flushed on
//! every write and closed when it is either [`close`](ScopedLog::close)d or
//! dropped, so an aborted run still leaves complete files behind. Only a
//! [`ClosedLog`] can be fed to [`RunLogs::concatenate_failed_logs`], which
//! makes "read after release" a type-level property.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};

use crate::classifier::TestInfo;
use crate::error::{HarnessError, Result};

pub const INIT_LOG: &str = "init.log";
pub const EXEC_LOG: &str = "exec_log.log";
pub const FAILED_TESTS_LOG: &str = "failed_tests.log";
pub const SUMMARY_FILE: &str = "summary.json";

/// Width of the `=` separator framing each entry in `failed_tests.log`.
pub const SEPARATOR_WIDTH: usize = 80;

const DIR_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Owner of one run's log directory.
#[derive(Debug)]
pub struct RunLogs {
    dir: PathBuf,
    verbose: bool,
    sequence: AtomicU32,
}

impl RunLogs {
    /// Create a fresh directory under `root` named after the current local time.
    pub fn create(root: &Path, verbose: bool) -> Result<Self> {
        Self::create_at(root, Local::now(), verbose)
    }

    /// Create a fresh directory under `root` named after `started`.
    ///
    /// If a directory with that name already exists, `_2`, `_3`, ... is
    /// appended until an unused name is found; an existing run is never
    /// reopened.
    pub fn create_at(root: &Path, started: DateTime<Local>, verbose: bool) -> Result<Self> {
        fs::create_dir_all(root).map_err(|source| HarnessError::LogDirectory {
            path: root.to_path_buf(),
            source,
        })?;

        let stamp = started.format(DIR_TIMESTAMP_FORMAT).to_string();
        let mut attempt = 1u32;
        loop {
            let name = if attempt == 1 {
                stamp.clone()
            } else {
                format!("{}_{}", stamp, attempt)
            };
            let dir = root.join(name);

            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "Created run log directory");
                    return Ok(Self {
                        dir,
                        verbose,
                        sequence: AtomicU32::new(0),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(HarnessError::LogDirectory { path: dir, source }),
            }
        }
    }

    /// The run directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn init_log_path(&self) -> PathBuf {
        self.dir.join(INIT_LOG)
    }

    pub fn execution_log_path(&self) -> PathBuf {
        self.dir.join(EXEC_LOG)
    }

    pub fn failed_tests_log_path(&self) -> PathBuf {
        self.dir.join(FAILED_TESTS_LOG)
    }

    /// Open `init.log` for appending.
    pub fn init_log(&self) -> Result<AppendLog> {
        AppendLog::open(self.init_log_path(), self.verbose)
    }

    /// Allocate the log file for one test execution.
    ///
    /// The file name carries a per-run sequence number so a test that runs
    /// twice, or two tests whose names sanitize to the same string, never
    /// share a file.
    pub fn scoped_log(&self, info: &TestInfo) -> Result<ScopedLog> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self
            .dir
            .join(format!("{:03}_{}.log", seq, sanitize_file_stem(&info.test_name)));

        let file = File::create(&path).map_err(|source| HarnessError::LogOpen {
            path: path.clone(),
            source,
        })?;
        debug!(test = %info, path = %path.display(), "Opened test log");

        Ok(ScopedLog {
            info: info.clone(),
            path,
            file: Some(file),
            echo: self.verbose,
        })
    }

    /// Write `failed_tests.log`: for each closed log, in the given order,
    /// a separator, a `Test: <name>` header, the full log, a separator and
    /// trailing blank lines.
    pub fn concatenate_failed_logs(&self, failed: &[ClosedLog]) -> Result<PathBuf> {
        let out_path = self.failed_tests_log_path();
        let write_err = |source| HarnessError::LogWrite {
            path: out_path.clone(),
            source,
        };

        let mut out = File::create(&out_path).map_err(|source| HarnessError::LogOpen {
            path: out_path.clone(),
            source,
        })?;
        let separator = "=".repeat(SEPARATOR_WIDTH);

        for log in failed {
            let content = fs::read_to_string(&log.path).map_err(|source| HarnessError::LogRead {
                path: log.path.clone(),
                source,
            })?;

            let mut entry = String::with_capacity(content.len() + 2 * SEPARATOR_WIDTH + 64);
            entry.push_str(&separator);
            entry.push('\n');
            entry.push_str(&format!("Test: {}\n\n\n", log.info.test_name));
            entry.push_str(&content);
            if !content.is_empty() && !content.ends_with('\n') {
                entry.push('\n');
            }
            entry.push_str(&separator);
            entry.push_str("\n\n\n");

            out.write_all(entry.as_bytes()).map_err(write_err)?;
        }
        out.flush().map_err(write_err)?;

        debug!(count = failed.len(), path = %out_path.display(), "Wrote failed test logs");
        Ok(out_path)
    }

    /// Serialize `value` as pretty JSON into `summary.json`.
    pub fn write_summary<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(SUMMARY_FILE);
        let json = serde_json::to_vec_pretty(value)?;
        fs::write(&path, json).map_err(|source| HarnessError::LogWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Replace anything that is not safe in a file name.
fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
            _ => '_',
        })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

fn write_flushed(file: &mut File, text: &str, echo: bool) -> io::Result<()> {
    file.write_all(text.as_bytes())?;
    file.flush()?;
    if echo {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

/// Write handle for one test's log file.
#[derive(Debug)]
pub struct ScopedLog {
    info: TestInfo,
    path: PathBuf,
    file: Option<File>,
    echo: bool,
}

impl ScopedLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `text` and flush it to disk immediately.
    pub fn write(&mut self, text: &str) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        write_flushed(file, text, self.echo).map_err(|source| HarnessError::LogWrite {
            path: self.path.clone(),
            source,
        })
    }

    /// Append one line of output.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.write(&text)
    }

    /// Release the file handle and return proof that the log is complete.
    pub fn close(mut self) -> Result<ClosedLog> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|source| HarnessError::LogWrite {
                path: self.path.clone(),
                source,
            })?;
        }
        debug!(test = %self.info, "Closed test log");
        Ok(ClosedLog {
            info: self.info.clone(),
            path: self.path.clone(),
        })
    }
}

impl Drop for ScopedLog {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(test = %self.info, error = %e, "Failed to flush test log on drop");
            }
            debug!(test = %self.info, "Test log released without explicit close");
        }
    }
}

/// A per-test log whose handle has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedLog {
    pub info: TestInfo,
    pub path: PathBuf,
}

/// Plain append-mode log (`init.log`).
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    file: File,
    echo: bool,
}

impl AppendLog {
    fn open(path: PathBuf, echo: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| HarnessError::LogOpen {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file, echo })
    }

    /// Append one line and flush.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        write_flushed(&mut self.file, &text, self.echo).map_err(|source| {
            HarnessError::LogWrite {
                path: self.path.clone(),
                source,
            }
        })
    }
}
