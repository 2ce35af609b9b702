//! Kernel test harness CLI
//!
//! The `ktest` command boots a kernel built in test mode, runs the selected
//! tests (one boot per test) and leaves logs under a timestamped directory.
//!
//! ```text
//! ktest -p build/run_qemu.sh -f 'mem_*' 'sched_*' -b 'mem_slow_*'
//! ktest -p build/run_qemu.sh --display
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ktest_core::{init_tracing, Orchestrator, ProcessLauncher, RunLogs, RunSpec, TimingLimits};

#[derive(Parser, Debug)]
#[command(name = "ktest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run the in-kernel test suite of a test-mode kernel build", long_about = None)]
struct Cli {
    /// Executable that boots the kernel with its console on stdio
    #[arg(short, long, value_parser = existing_file)]
    path: PathBuf,

    /// Only run tests matching these patterns (`*` wildcard)
    #[arg(short, long, num_args = 1..)]
    filter: Vec<String>,

    /// Never run tests matching these patterns (`*` wildcard)
    #[arg(short, long, num_args = 1..)]
    block: Vec<String>,

    /// List the selected tests without running them
    #[arg(short, long)]
    display: bool,

    /// Echo kernel output to the console while logging it
    #[arg(short, long)]
    verbose: bool,

    /// Also run tests the kernel marks as manual
    #[arg(long)]
    manual: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Directory that receives one timestamped subdirectory per run
    #[arg(long, env = "KTEST_LOG_ROOT", default_value = "test_framework_logs")]
    log_root: PathBuf,

    /// Seconds allowed from launch until the kernel lists its tests
    #[arg(long, env = "KTEST_BOOT_TIMEOUT", default_value_t = 30)]
    boot_timeout: u64,

    /// Seconds allowed for the kernel to finish its test list
    #[arg(long, env = "KTEST_SYNC_TIMEOUT", default_value_t = 10)]
    sync_timeout: u64,

    /// Seconds allowed per test, from dispatch until the kernel powers off
    #[arg(long, env = "KTEST_TEST_TIMEOUT", default_value_t = 60)]
    test_timeout: u64,

    /// Seconds allowed for the whole run (unbounded when omitted)
    #[arg(long, env = "KTEST_RUN_TIMEOUT")]
    run_timeout: Option<u64>,
}

impl Cli {
    fn timing_limits(&self) -> TimingLimits {
        TimingLimits {
            boot: Duration::from_secs(self.boot_timeout),
            sync: Duration::from_secs(self.sync_timeout),
            test: Duration::from_secs(self.test_timeout),
            run: self.run_timeout.map(Duration::from_secs),
        }
    }

    fn run_spec(&self) -> Result<RunSpec> {
        let spec = RunSpec::new(
            self.path.clone(),
            self.filter.clone(),
            self.block.clone(),
            self.display,
            self.verbose,
        )
        .context("Invalid test selection")?;
        Ok(spec.with_manual(self.manual))
    }
}

/// Accept only paths naming an existing regular file, made absolute so the
/// launcher never resolves it through `PATH`.
fn existing_file(raw: &str) -> std::result::Result<PathBuf, String> {
    let path = Path::new(raw);
    if !path.exists() {
        return Err(format!("{} does not exist", raw));
    }
    if !path.is_file() {
        return Err(format!("{} is not a regular file", raw));
    }
    path.canonicalize()
        .map_err(|e| format!("cannot resolve {}: {}", raw, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let code = run(cli).await?;
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let spec = cli.run_spec()?;
    let limits = cli.timing_limits();

    let logs = RunLogs::create(&cli.log_root, cli.verbose).with_context(|| {
        format!(
            "Failed to create log directory under {}",
            cli.log_root.display()
        )
    })?;
    init_tracing(cli.verbose, cli.json, Some(&logs.execution_log_path()))
        .context("Failed to open execution log")?;

    info!(
        kernel = %spec.kernel_path.display(),
        filters = ?spec.filters,
        blocks = ?spec.blocks,
        "ktest starting"
    );

    let launcher = Arc::new(ProcessLauncher::new(spec.kernel_path.clone()));
    let report = Orchestrator::new(spec, limits, launcher, logs)
        .run()
        .await
        .context("Kernel test run aborted")?;

    print!("{}", report.render_text());
    if !report.display_only {
        println!(
            "Status: {}",
            if report.success() {
                "✓ PASSED"
            } else {
                "✗ FAILED"
            }
        );
    }
    Ok(report.exit_code())
}
