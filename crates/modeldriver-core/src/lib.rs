//! Model driver core - platform-independent supervision of model processes
//!
//! This crate provides the driver state machine, configuration, error
//! types and process traits shared by the platform-specific crates.

pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod outcome;
pub mod output;
pub mod platform;
pub mod process;
pub mod state;
pub mod stdio;
pub mod timeout;

pub use config::{ENV_ALLOWLIST, ModelDriverConfig, ModelDriverConfigBuilder, StderrMode};
pub use driver::ModelDriver;
pub use error::{DriverError, ProcessError};
pub use lifecycle::{Lifecycle, supervise};
pub use outcome::{DriverPhase, ExitOutcome};
pub use output::{LineCodec, OutputLine, OutputPump};
pub use platform::TargetPlatform;
pub use process::*;
pub use state::{Event, LifecycleState};
pub use stdio::{DriverStdErr, DriverStdOut, DriverStdio};
pub use timeout::{TimeoutContext, TimeoutScope};
