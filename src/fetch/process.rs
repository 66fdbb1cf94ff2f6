//! Child process execution

use crate::error::{DlxError, DlxResult};
use crate::fetch::ProcessRunner;
use crate::install::binary::Executable;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use tracing::debug;

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Exit code to propagate, following the shell convention for signals
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Runs executables with inherited stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, executable: &Executable, args: &[String]) -> DlxResult<ExitInfo> {
        let mut command = executable.command();
        command
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        debug!("Spawning {} with {} args", executable.path.display(), args.len());
        let mut child = command.spawn().map_err(|e| {
            DlxError::command_failed(executable.path.display().to_string(), e)
        })?;

        // The child shares our terminal and receives Ctrl-C itself; keep
        // waiting so its exit code is what we report.
        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| {
                        DlxError::io(format!("waiting for {}", executable.path.display()), e)
                    })?;
                    return Ok(status.into());
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupt received, waiting for child to exit");
                }
            }
        }
    }
}
