#[cfg(windows)]
mod windows_impl {
    use anyhow::Result;
    use async_trait::async_trait;
    use modeldriver_core::{
        OutputStream, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus,
        SpawnedProcess, StderrMode, TerminationResult,
    };
    use std::collections::HashMap;
    use std::path::Path;
    use std::process::Stdio;
    use tokio::process::{Child, Command};
    use tracing::{info, warn};

    /// Windows-specific process handle implementation
    pub struct WindowsProcessHandle {
        child: Child,
        command: String,
        args: Vec<String>,
    }

    impl WindowsProcessHandle {
        pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
            Self {
                child,
                command,
                args,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for WindowsProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }

        fn get_command(&self) -> &str {
            &self.command
        }

        fn get_args(&self) -> &[String] {
            &self.args
        }

        async fn try_wait(&mut self) -> Result<ProcessStatus> {
            match self.child.try_wait()? {
                Some(status) => Ok(ProcessStatus::from_exit_status(status)),
                None => Ok(ProcessStatus::Running),
            }
        }

        async fn force_kill(&mut self) -> TerminationResult {
            let Some(pid) = self.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            // TerminateProcess under the hood
            match self.child.start_kill() {
                Ok(()) => {
                    info!("Terminated Windows process {}", pid);
                    TerminationResult::Success
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!("Access denied terminating process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to terminate process {}: {}", pid, e);
                    TerminationResult::Failed(e.to_string())
                }
            }
        }
    }

    /// Spawns model processes with `tokio::process`
    #[derive(Debug, Default)]
    pub struct WindowsProcessManager;

    impl WindowsProcessManager {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl ProcessLifecycle for WindowsProcessManager {
        type Handle = WindowsProcessHandle;

        async fn spawn_process(
            &self,
            command: &str,
            args: &[String],
            working_dir: Option<&Path>,
            env: &HashMap<String, String>,
            stderr: StderrMode,
        ) -> Result<SpawnedProcess<WindowsProcessHandle>, ProcessError> {
            let mut cmd = Command::new(command);
            cmd.args(args)
                .env_clear()
                .envs(env)
                .stdout(Stdio::piped())
                .kill_on_drop(true);

            if let Some(dir) = working_dir {
                cmd.current_dir(dir);
            }

            match stderr {
                StderrMode::Inherit => cmd.stderr(Stdio::inherit()),
                StderrMode::Capture => cmd.stderr(Stdio::piped()),
            };

            let mut child = cmd.spawn()?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Windows process: {} (PID: {}) with args: {:?}",
                    command, pid, args
                );
            }

            let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
            let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);

            Ok(SpawnedProcess {
                handle: WindowsProcessHandle::new(child, command.to_string(), args.to_vec()),
                stdout,
                stderr,
            })
        }
    }

}

#[cfg(windows)]
pub use windows_impl::{WindowsProcessHandle, WindowsProcessManager};

// Provide stub implementations for non-Windows systems
#[cfg(not(windows))]
pub struct WindowsProcessHandle;

#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct WindowsProcessManager;

#[cfg(not(windows))]
impl WindowsProcessManager {
    pub fn new() -> Self {
        Self
    }
}
