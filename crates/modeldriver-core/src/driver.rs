use crate::config::ModelDriverConfig;
use crate::error::DriverError;
use crate::outcome::{DriverPhase, ExitOutcome, PhaseCell};
use crate::output::{OutputLine, OutputPump};
use crate::process::{ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus, SpawnedProcess};
use crate::state::LifecycleState;
use crate::stdio::{self, DriverStdErr, DriverStdOut, DriverStdio};
use crate::timeout::{EXIT_WAIT_KEY, KILL_WAIT_KEY, TimeoutContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Supervises the external process of one model.
///
/// `start` spawns the process and its output pump, `run` forwards the
/// model's stdout to the driver's stdout sink until the model exits, and
/// `kill_process` brings everything to the terminal state. `kill_process`
/// and `terminate` may be called any number of times from any task; only the
/// first call does any work.
pub struct ModelDriver<M: ProcessLifecycle> {
    config: ModelDriverConfig,
    process_manager: Arc<M>,
    state: Arc<LifecycleState>,
    phase: PhaseCell,
    /// Child handle. Only ever written with this lock held.
    process: Mutex<Option<M::Handle>>,
    output: Mutex<Option<UnboundedReceiver<OutputLine>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    timeouts: TimeoutContext,
    outcome: OnceLock<ExitOutcome>,
    signals_sent: AtomicUsize,
    out: DriverStdio,
    err: DriverStdErr,
}

impl<M: ProcessLifecycle> ModelDriver<M> {
    pub fn new(config: ModelDriverConfig, process_manager: Arc<M>) -> Result<Self, DriverError> {
        Self::new_with_buffers(
            config,
            process_manager,
            DriverStdOut::default(),
            DriverStdErr::default(),
        )
    }

    /// Like [`ModelDriver::new`], forwarding model output to the given sinks
    pub fn new_with_buffers(
        config: ModelDriverConfig,
        process_manager: Arc<M>,
        out: DriverStdOut,
        err: DriverStdErr,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        debug!(model = %config.name, args = ?config.args, "Creating model driver");

        Ok(Self {
            config,
            process_manager,
            state: Arc::new(LifecycleState::new()),
            phase: PhaseCell::default(),
            process: Mutex::new(None),
            output: Mutex::new(None),
            workers: std::sync::Mutex::new(Vec::new()),
            timeouts: TimeoutContext::new(),
            outcome: OnceLock::new(),
            signals_sent: AtomicUsize::new(0),
            out: out.into(),
            err,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ModelDriverConfig {
        &self.config
    }

    pub fn args(&self) -> &[String] {
        &self.config.args
    }

    /// Whether the orchestrator should pair this model with a server channel
    pub fn is_server(&self) -> bool {
        self.config.is_server
    }

    /// Names of the server models this model is a client of
    pub fn client_of(&self) -> &[String] {
        &self.config.client_of
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase.get()
    }

    pub fn is_started(&self) -> bool {
        self.state.started.is_set()
    }

    pub fn is_kill_called(&self) -> bool {
        self.state.kill_called.is_set()
    }

    pub fn is_kill_complete(&self) -> bool {
        self.state.kill_complete.is_set()
    }

    pub fn is_exit_observed(&self) -> bool {
        self.state.exit_observed.is_set()
    }

    /// How the process ended, once kill has completed
    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.outcome.get().copied()
    }

    /// Number of forceful kill signals this driver attempted
    pub fn kill_signals_sent(&self) -> usize {
        self.signals_sent.load(Ordering::Acquire)
    }

    /// Pid of the live child, if there is one
    pub async fn pid(&self) -> Option<ProcessId> {
        self.process.lock().await.as_ref().and_then(|h| h.get_pid())
    }

    /// Spawn the model process and its output pump.
    pub async fn start(&self) -> Result<(), DriverError> {
        if self.state.kill_complete.is_set() {
            return Err(DriverError::Terminated(self.config.name.clone()));
        }
        if !self.state.started.try_set() {
            return Err(DriverError::AlreadyStarted(self.config.name.clone()));
        }
        self.start_setup().await
    }

    async fn start_setup(&self) -> Result<(), DriverError> {
        let mut slot = self.process.lock().await;
        if self.state.kill_called.is_set() {
            debug!(model = %self.config.name, "Kill requested before spawn, not starting");
            self.state.exit_observed.set();
            return Err(DriverError::Terminated(self.config.name.clone()));
        }

        let command_line = self.config.command_line();
        let (program, args) = command_line.split_first().ok_or_else(|| {
            DriverError::Configuration(format!("model {} has no command", self.config.name))
        })?;
        let env = self.config.spawn_environment(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }));
        debug!(
            model = %self.config.name,
            command = ?command_line,
            cwd = ?self.config.working_dir,
            "Spawning model process"
        );

        let spawned = self
            .process_manager
            .spawn_process(
                program,
                args,
                self.config.working_dir.as_deref(),
                &env,
                self.config.stderr,
            )
            .await;

        let SpawnedProcess {
            handle,
            stdout,
            stderr,
        } = match spawned {
            Ok(spawned) => spawned,
            Err(source) => {
                error!(model = %self.config.name, "Failed to spawn model process: {}", source);
                self.abandon_start();
                return Err(DriverError::Spawn {
                    command: command_line.join(" "),
                    source,
                });
            }
        };

        let Some(stdout) = stdout else {
            self.abandon_start();
            return Err(DriverError::MissingStdout);
        };

        info!(
            model = %self.config.name,
            pid = ?handle.get_pid(),
            "Started model process"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        *self.output.lock().await = Some(rx);

        let mut workers = vec![OutputPump::spawn(
            self.config.name.clone(),
            stdout,
            tx,
            self.state.clone(),
        )];
        if let Some(stderr) = stderr {
            let name = self.config.name.clone();
            let err = self.err.clone();
            workers.push(tokio::spawn(async move {
                if let Err(e) = stdio::stream(stderr, err).await {
                    warn!(model = %name, "Stopped forwarding model stderr: {}", e);
                }
            }));
        }

        *slot = Some(handle);
        self.workers_lock().extend(workers);
        self.phase.advance(DriverPhase::Spawned);
        Ok(())
    }

    /// Spawn failed after `started` was set: nothing will ever run.
    fn abandon_start(&self) {
        let _ = self.outcome.set(ExitOutcome::NotStarted);
        self.state.mark_never_started();
        self.phase.advance(DriverPhase::Killed);
    }

    /// Forward model output until it ends or the model is killed, then finalize.
    pub async fn run(&self) {
        debug!(
            model = %self.config.name,
            args = ?self.config.args,
            cwd = ?self.config.working_dir,
            "Running model"
        );

        let receiver = self.output.lock().await.take();
        match receiver {
            Some(mut rx) if self.state.started.is_set() => {
                self.phase.advance(DriverPhase::Draining);
                debug!(model = %self.config.name, "Beginning loop");
                while self.run_loop(&mut rx).await {}
            }
            _ => {
                debug!(model = %self.config.name, "No output to forward");
            }
        }

        self.phase.advance(DriverPhase::ExitDetected);
        self.run_finalize().await;
    }

    /// One step of the drain loop. Returns false once draining is over.
    async fn run_loop(&self, rx: &mut UnboundedReceiver<OutputLine>) -> bool {
        if self.state.kill_complete.is_set() {
            debug!(model = %self.config.name, "Kill completed while draining output");
            return false;
        }

        match rx.try_recv() {
            Ok(OutputLine::Text(line)) => {
                if let Err(e) = self.out.forward(&line).await {
                    warn!(model = %self.config.name, "Failed to forward model output: {}", e);
                }
                true
            }
            Ok(OutputLine::Sentinel) => {
                debug!(model = %self.config.name, "No more output");
                false
            }
            Err(TryRecvError::Empty) => {
                tokio::time::sleep(self.config.poll_interval()).await;
                true
            }
            Err(TryRecvError::Disconnected) => {
                warn!(model = %self.config.name, "Output channel closed without end marker");
                false
            }
        }
    }

    async fn run_finalize(&self) {
        self.phase.advance(DriverPhase::Finalizing);
        self.wait_process(Some(self.config.timeout())).await;
        self.kill_process().await;
        self.join_workers().await;
    }

    /// Wait up to `timeout` (forever for `None`) for the model to exit.
    ///
    /// Never fails: a model still running afterwards is left for
    /// [`ModelDriver::kill_process`]. Does not block on a kill in progress.
    pub async fn wait_process(&self, timeout: Option<Duration>) {
        if !self.state.started.is_set() {
            return;
        }

        let scope = self.timeouts.open(EXIT_WAIT_KEY, timeout);
        loop {
            if let Ok(mut slot) = self.process.try_lock() {
                match slot.as_mut() {
                    None => break,
                    Some(handle) => {
                        if !self.poll(handle).await.is_running() {
                            break;
                        }
                    }
                }
            }

            if scope.is_expired() {
                debug!(
                    model = %self.config.name,
                    "Model still running after {:?}",
                    scope.elapsed()
                );
                break;
            }
            self.sleep_within(scope.remaining()).await;
        }
        scope.close();
    }

    /// Kill the model process if it is still running and record how it ended.
    ///
    /// Safe to call any number of times concurrently; only the first call
    /// signals the process. Always ends with `kill_complete` set.
    pub async fn kill_process(&self) {
        if !self.state.started.is_set() {
            debug!(model = %self.config.name, "Process was never started.");
            let _ = self.outcome.set(ExitOutcome::NotStarted);
            self.state.mark_never_started();
            self.phase.advance(DriverPhase::Killed);
            return;
        }

        if !self.state.kill_called.try_set() {
            debug!(model = %self.config.name, "Process has already been killed.");
            return;
        }

        let mut slot = self.process.lock().await;
        match slot.as_mut() {
            Some(handle) => {
                let outcome = self.settle(handle).await;
                self.report(&outcome);
                let _ = self.outcome.set(outcome);
            }
            None => {
                // Won the lock before start could spawn; start will see kill_called
                debug!(model = %self.config.name, "Killed before the process was spawned.");
                let _ = self.outcome.set(ExitOutcome::NotStarted);
                self.state.exit_observed.set();
            }
        }

        self.state.kill_complete.set();
        *slot = None;
        self.phase.advance(DriverPhase::Killed);
    }

    /// Kill the process and wait for the shutdown to finish, even when
    /// another caller got to `kill_process` first.
    pub async fn terminate(&self) {
        debug!(model = %self.config.name, "Terminating model");
        self.kill_process().await;

        let bound = self.config.timeout() + self.config.join_timeout();
        if !self.state.kill_complete.wait_timeout(bound).await {
            warn!(
                model = %self.config.name,
                "Kill did not complete within {:?}",
                bound
            );
        }
        self.join_workers().await;
    }

    /// Wait until the driver reaches its terminal state. Returns whether it did.
    pub async fn wait_terminated(&self, timeout: Duration) -> bool {
        self.state.kill_complete.wait_timeout(timeout).await
    }

    async fn settle(&self, handle: &mut M::Handle) -> ExitOutcome {
        let status = self.poll(handle).await;
        if !status.is_running() {
            return ExitOutcome::from_status(status);
        }

        debug!(model = %self.config.name, "Return code is None, killing model process");
        self.signals_sent.fetch_add(1, Ordering::AcqRel);
        let result = handle.force_kill().await;
        if !result.is_delivered() {
            error!(
                model = %self.config.name,
                result = ?result,
                "Error killing model process"
            );
        }

        debug!(
            model = %self.config.name,
            "Waiting {:?} for process to be killed",
            self.config.timeout()
        );
        let scope = self.timeouts.open(KILL_WAIT_KEY, Some(self.config.timeout()));
        let status = loop {
            let status = self.poll(handle).await;
            if !status.is_running() || scope.is_expired() {
                break status;
            }
            self.sleep_within(scope.remaining()).await;
        };
        scope.close();

        match status {
            ProcessStatus::Running => ExitOutcome::Unresolved,
            // Exited on its own before the signal landed. Windows reports
            // a terminated process as an exit code, so only trust it elsewhere.
            ProcessStatus::Exited(_) if !self.config.platform.is_windows() => {
                ExitOutcome::from_status(status)
            }
            status => ExitOutcome::ForceKilled { status },
        }
    }

    fn report(&self, outcome: &ExitOutcome) {
        let name = &self.config.name;
        match outcome {
            ExitOutcome::NotStarted => {}
            ExitOutcome::Exited { code: 0 } => {
                info!(model = %name, "Model process exited normally");
            }
            ExitOutcome::Exited { code } => {
                error!(model = %name, code, "return code of {} indicates model error.", code);
            }
            ExitOutcome::Signaled { signal } => {
                error!(model = %name, signal, "Model process was terminated by signal {}", signal);
            }
            ExitOutcome::ForceKilled { status } => {
                error!(
                    model = %name,
                    "Model process did not exit within {:?} and was killed ({})",
                    self.config.timeout(),
                    status
                );
            }
            ExitOutcome::Unresolved => {
                error!(model = %name, "Model process could not be confirmed dead after kill");
            }
        }
    }

    async fn poll(&self, handle: &mut M::Handle) -> ProcessStatus {
        match handle.try_wait().await {
            Ok(status) => status,
            Err(e) => {
                warn!(model = %self.config.name, "Failed to poll model process: {}", e);
                ProcessStatus::Running
            }
        }
    }

    async fn sleep_within(&self, remaining: Option<Duration>) {
        let interval = self.config.poll_interval();
        let nap = remaining.map_or(interval, |r| r.min(interval));
        tokio::time::sleep(nap).await;
    }

    /// Join the background workers, aborting any that outlive the grace period.
    async fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers_lock());
        let grace = self.config.join_timeout();

        for mut worker in workers {
            match tokio::time::timeout(grace, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(model = %self.config.name, "Output worker failed: {}", e);
                }
                Err(_) => {
                    warn!(
                        model = %self.config.name,
                        "Output worker still running after {:?}, aborting",
                        grace
                    );
                    worker.abort();
                }
            }
        }
    }

    fn workers_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<M: ProcessLifecycle> Drop for ModelDriver<M> {
    fn drop(&mut self) {
        let live = self
            .process
            .try_lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true);
        if live {
            warn!(
                model = %self.config.name,
                "Model driver dropped with a live process; it will be killed"
            );
        }

        for worker in self.workers_lock().drain(..) {
            worker.abort();
        }
    }
}
