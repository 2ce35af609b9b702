//! The execution log records phase failures through the tracing subscriber.
//!
//! Kept in its own test binary: the subscriber is process-global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ktest_core::fakes::{Behavior, BootMode, FakeKernel};
use ktest_core::{
    init_tracing, KernelLauncher, Orchestrator, PhaseFailure, RunLogs, RunPhase, RunSpec,
    TimingLimits,
};

#[tokio::test(start_paused = true)]
async fn test_boot_timeout_recorded_in_exec_log() {
    let root = tempfile::tempdir().unwrap();
    let logs = RunLogs::create(root.path(), false).unwrap();
    let exec_log = logs.execution_log_path();
    init_tracing(false, false, Some(&exec_log)).unwrap();

    let kernel: Arc<dyn KernelLauncher> = Arc::new(
        FakeKernel::new()
            .with_test("alpha", Behavior::Pass)
            .with_boot_mode(BootMode::HangBeforeBoot),
    );
    let spec = RunSpec::new(PathBuf::from("kernel.sh"), Vec::new(), Vec::new(), false, false)
        .unwrap();
    let limits = TimingLimits {
        boot: Duration::from_secs(5),
        ..TimingLimits::default()
    };

    let report = Orchestrator::new(spec, limits, kernel, logs)
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Failed);
    assert_eq!(
        report.failure,
        Some(PhaseFailure::BootTimeout {
            limit: Duration::from_secs(5)
        })
    );

    let content = std::fs::read_to_string(&exec_log).unwrap();
    assert!(content.contains("Starting kernel test run"));
    assert!(content.contains("Run failed"));
    assert!(content.contains("BOOTING"));
    assert!(content.contains("kernel did not finish booting within 5s"));
}
