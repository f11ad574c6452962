use crate::config::StderrMode;
use crate::error::ProcessError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncRead;

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a model process as last polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited on its own with the given exit code
    Exited(i32),
    /// Process was terminated by a signal (Unix only)
    Signaled(i32),
    /// Process is gone but reported neither a code nor a signal
    Unknown,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    #[cfg(unix)]
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessStatus::Exited(code),
            (None, Some(signal)) => ProcessStatus::Signaled(signal),
            (None, None) => ProcessStatus::Unknown,
        }
    }

    #[cfg(not(unix))]
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        status
            .code()
            .map(ProcessStatus::Exited)
            .unwrap_or(ProcessStatus::Unknown)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited(code) => write!(f, "exit code {code}"),
            ProcessStatus::Signaled(signal) => write!(f, "signal {signal}"),
            ProcessStatus::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Result of a forceful termination attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Kill signal was delivered
    Success,
    /// Process was not found (already exited and reaped)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// Whether the process is known to be on its way out
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// Byte stream of a child's stdout or stderr
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Everything a platform hands back after spawning a model
pub struct SpawnedProcess<H> {
    pub handle: H,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Get the arguments passed to this process
    fn get_args(&self) -> &[String];

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<ProcessStatus>;

    /// Deliver a forceful kill (SIGKILL on Unix, TerminateProcess on Windows)
    async fn force_kill(&mut self) -> TerminationResult;
}

/// Platform-specific process spawning
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle + 'static;

    /// Spawn a new process with stdout piped and stderr per `stderr`.
    ///
    /// The child gets exactly `env` as its environment.
    async fn spawn_process(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
        stderr: StderrMode,
    ) -> std::result::Result<SpawnedProcess<Self::Handle>, ProcessError>;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessLifecycle;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[async_trait]
impl ProcessHandle for Box<dyn ProcessHandle> {
    fn get_pid(&self) -> Option<ProcessId> {
        (**self).get_pid()
    }

    fn get_command(&self) -> &str {
        (**self).get_command()
    }

    fn get_args(&self) -> &[String] {
        (**self).get_args()
    }

    async fn try_wait(&mut self) -> Result<ProcessStatus> {
        (**self).try_wait().await
    }

    async fn force_kill(&mut self) -> TerminationResult {
        (**self).force_kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Exited(1).to_string(), "exit code 1");
        assert_eq!(ProcessStatus::Signaled(9).to_string(), "signal 9");
        assert!(ProcessStatus::Running.is_running());
        assert!(!ProcessStatus::Unknown.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_status_from_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(1 << 8);
        assert_eq!(ProcessStatus::from_exit_status(status), ProcessStatus::Exited(1));

        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(ProcessStatus::from_exit_status(status), ProcessStatus::Signaled(9));
    }

    #[test]
    fn test_termination_delivery() {
        assert!(TerminationResult::Success.is_delivered());
        assert!(TerminationResult::ProcessNotFound.is_delivered());
        assert!(!TerminationResult::AccessDenied.is_delivered());
        assert!(!TerminationResult::Failed("x".into()).is_delivered());
    }
}
