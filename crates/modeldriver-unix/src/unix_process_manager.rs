#[cfg(unix)]
mod unix_impl {
    use anyhow::Result;
    use async_trait::async_trait;
    use modeldriver_core::{
        OutputStream, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus,
        SpawnedProcess, StderrMode, TerminationResult,
    };
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::collections::HashMap;
    use std::path::Path;
    use std::process::Stdio;
    use tokio::process::{Child, Command};
    use tracing::{info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
        args: Vec<String>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
            Self {
                child,
                command,
                args,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
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
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            match signal::kill(nix_pid, Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process {}", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to kill process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGKILL to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                }
            }
        }
    }

    /// Spawns model processes with `tokio::process`
    #[derive(Debug, Default)]
    pub struct UnixProcessManager;

    impl UnixProcessManager {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn_process(
            &self,
            command: &str,
            args: &[String],
            working_dir: Option<&Path>,
            env: &HashMap<String, String>,
            stderr: StderrMode,
        ) -> Result<SpawnedProcess<UnixProcessHandle>, ProcessError> {
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

            // Own process group: signals aimed at the supervisor are not forwarded
            cmd.process_group(0);

            let mut child = cmd.spawn()?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    command, pid, args
                );
            }

            let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
            let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);

            Ok(SpawnedProcess {
                handle: UnixProcessHandle::new(child, command.to_string(), args.to_vec()),
                stdout,
                stderr,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::Duration;
        use tokio::io::AsyncReadExt;

        fn ambient() -> HashMap<String, String> {
            std::env::vars().collect()
        }

        #[tokio::test]
        async fn test_spawn_captures_stdout() {
            let manager = UnixProcessManager::new();
            let spawned = manager
                .spawn_process(
                    "echo",
                    &["hello".to_string()],
                    None,
                    &ambient(),
                    StderrMode::Inherit,
                )
                .await
                .unwrap();

            let mut out = String::new();
            spawned
                .stdout
                .unwrap()
                .read_to_string(&mut out)
                .await
                .unwrap();
            assert_eq!(out, "hello\n");
            assert!(spawned.stderr.is_none());
        }

        #[tokio::test]
        async fn test_spawn_uses_exact_environment_and_cwd() {
            let manager = UnixProcessManager::new();
            let mut env = HashMap::new();
            env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());
            env.insert("MODEL_MARKER".to_string(), "42".to_string());

            let spawned = manager
                .spawn_process(
                    "sh",
                    &["-c".to_string(), "echo $MODEL_MARKER $HOME; pwd".to_string()],
                    Some(Path::new("/")),
                    &env,
                    StderrMode::Capture,
                )
                .await
                .unwrap();

            let mut out = String::new();
            spawned
                .stdout
                .unwrap()
                .read_to_string(&mut out)
                .await
                .unwrap();
            assert_eq!(out, "42\n/\n");
            assert!(spawned.stderr.is_some());
        }

        #[tokio::test]
        async fn test_force_kill_and_status() {
            let manager = UnixProcessManager::new();
            let mut spawned = manager
                .spawn_process(
                    "sleep",
                    &["5".to_string()],
                    None,
                    &ambient(),
                    StderrMode::Inherit,
                )
                .await
                .unwrap();

            let handle = &mut spawned.handle;
            assert_eq!(handle.try_wait().await.unwrap(), ProcessStatus::Running);
            assert_eq!(handle.force_kill().await, TerminationResult::Success);

            let mut status = handle.try_wait().await.unwrap();
            for _ in 0..100 {
                if !status.is_running() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                status = handle.try_wait().await.unwrap();
            }
            assert_eq!(status, ProcessStatus::Signaled(9));
        }

        #[tokio::test]
        async fn test_missing_binary_fails_to_spawn() {
            let manager = UnixProcessManager::new();
            let result = manager
                .spawn_process(
                    "definitely-not-a-model-binary",
                    &[],
                    None,
                    &ambient(),
                    StderrMode::Inherit,
                )
                .await;
            assert!(matches!(result, Err(ProcessError::IoError(_))));
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
#[derive(Debug, Default)]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}
