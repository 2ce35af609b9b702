//! Kernel process lifecycle.
//!
//! The orchestrator only needs a line stream, a way to send a command and a
//! way to stop the kernel. [`ProcessLauncher`] provides that for any
//! executable that boots the kernel with its console on stdio (typically a
//! QEMU wrapper script).

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// Starts kernel sessions.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    /// Boot a fresh kernel instance.
    async fn launch(&self) -> Result<Box<dyn KernelSession>>;
}

/// One running kernel instance.
#[async_trait]
pub trait KernelSession: Send {
    /// Next console line, without its terminator. `None` once the kernel's
    /// output is closed (the process exited).
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Send one command line to the kernel console.
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// Stop the kernel if it is still running. Idempotent.
    async fn terminate(&mut self) -> Result<()>;
}

/// Launches the kernel by executing a file.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments passed to the program on every launch.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl KernelLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Box<dyn KernelSession>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Launch {
                path: self.program.clone(),
                source,
            })?;

        debug!(program = %self.program.display(), pid = ?child.id(), "Kernel launched");

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }
        let stdin = child.stdin.take();

        Ok(Box::new(ProcessSession {
            child,
            stdin,
            lines: rx,
            terminated: false,
        }))
    }
}

/// Pump lines from one pipe into the shared channel until EOF.
///
/// Bytes are decoded lossily: a kernel printing garbage must not end the
/// stream.
fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<std::io::Result<String>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
}

/// A kernel running as a child process.
struct ProcessSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
    terminated: bool,
}

#[async_trait]
impl KernelSession for ProcessSession {
    async fn next_line(&mut self) -> Result<Option<String>> {
        match self.lines.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(HarnessError::KernelIo(e)),
            None => Ok(None),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            HarnessError::KernelIo(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "kernel console input is closed",
            ))
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.stdin = None;

        match self.child.try_wait()? {
            Some(status) => debug!(?status, "Kernel already exited"),
            None => {
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "Failed to kill kernel process");
                    return Err(HarnessError::KernelIo(e));
                }
                debug!("Kernel process killed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_missing_program_is_fatal() {
        let launcher = ProcessLauncher::new("/nonexistent-kernel-runner-that-does-not-exist");
        let err = launcher.launch().await.err().expect("launch should fail");
        assert!(matches!(err, HarnessError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_session_reads_lines_until_exit() {
        let launcher = ProcessLauncher::new("sh")
            .with_args(vec!["-c".to_string(), "echo one; echo two >&2".to_string()]);
        let mut session = launcher.launch().await.expect("launch sh");

        let mut lines = Vec::new();
        while let Some(line) = session.next_line().await.expect("read line") {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        session.terminate().await.expect("terminate");
        session.terminate().await.expect("terminate twice");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_session_echoes_command() {
        let launcher = ProcessLauncher::new("sh")
            .with_args(vec!["-c".to_string(), "read cmd; echo \"got $cmd\"".to_string()]);
        let mut session = launcher.launch().await.expect("launch sh");

        session.send_line("exit").await.expect("send");
        assert_eq!(session.next_line().await.unwrap(), Some("got exit".to_string()));
        assert_eq!(session.next_line().await.unwrap(), None);
        session.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_session_survives_invalid_utf8() {
        let launcher = ProcessLauncher::new("sh").with_args(vec![
            "-c".to_string(),
            "printf 'raw byte \\377 from kernel\\r\\n'; echo after".to_string(),
        ]);
        let mut session = launcher.launch().await.expect("launch sh");

        assert_eq!(
            session.next_line().await.unwrap(),
            Some("raw byte \u{FFFD} from kernel".to_string())
        );
        assert_eq!(session.next_line().await.unwrap(), Some("after".to_string()));
        assert_eq!(session.next_line().await.unwrap(), None);
        session.terminate().await.unwrap();
    }
}
