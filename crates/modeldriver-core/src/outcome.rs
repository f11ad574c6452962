use crate::process::ProcessStatus;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// How a model process ended, recorded once when kill completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// No process was ever spawned
    NotStarted,
    /// Exited on its own
    Exited { code: i32 },
    /// Died from a signal the driver did not send
    Signaled { signal: i32 },
    /// Still running after the wait and killed by the driver
    ForceKilled { status: ProcessStatus },
    /// Status still unknown after the kill settle wait
    Unresolved,
}

impl ExitOutcome {
    /// Outcome for a process that was found already stopped
    pub fn from_status(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Exited(code) => ExitOutcome::Exited { code },
            ProcessStatus::Signaled(signal) => ExitOutcome::Signaled { signal },
            ProcessStatus::Running | ProcessStatus::Unknown => ExitOutcome::Unresolved,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited { code: 0 })
    }

    /// Whether this outcome is reported at error level
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitOutcome::NotStarted | ExitOutcome::Exited { code: 0 })
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::NotStarted => write!(f, "never started"),
            ExitOutcome::Exited { code } => write!(f, "exited with code {code}"),
            ExitOutcome::Signaled { signal } => write!(f, "terminated by signal {signal}"),
            ExitOutcome::ForceKilled { status } => write!(f, "force killed ({status})"),
            ExitOutcome::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Where a driver is in `Idle → Spawned → Draining → ExitDetected → Finalizing → Killed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DriverPhase {
    Idle = 0,
    Spawned = 1,
    Draining = 2,
    ExitDetected = 3,
    Finalizing = 4,
    Killed = 5,
}

impl DriverPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DriverPhase::Idle,
            1 => DriverPhase::Spawned,
            2 => DriverPhase::Draining,
            3 => DriverPhase::ExitDetected,
            4 => DriverPhase::Finalizing,
            _ => DriverPhase::Killed,
        }
    }
}

/// Phase that only ever moves forward
#[derive(Debug, Default)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn advance(&self, phase: DriverPhase) {
        self.0.fetch_max(phase as u8, Ordering::AcqRel);
    }

    pub(crate) fn get(&self) -> DriverPhase {
        DriverPhase::from_u8(self.0.load(Ordering::Acquire))
    }
}
