//! Supervise external model processes on the current platform.
//!
//! ```no_run
//! use modeldriver::{ModelDriverConfig, model_driver};
//!
//! # async fn demo() -> Result<(), modeldriver::DriverError> {
//! let config = ModelDriverConfig::builder()
//!     .name("echo-model")
//!     .args(["echo", "hello"])
//!     .build()
//!     .map_err(|e| modeldriver::DriverError::Configuration(e.to_string()))?;
//! let driver = model_driver(config)?;
//! driver.start().await?;
//! driver.run().await;
//! # Ok(())
//! # }
//! ```

pub mod shutdown;

use modeldriver_core::ProcessManagerFactory;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

#[cfg(unix)]
pub type PlatformProcessManager = modeldriver_unix::UnixProcessManager;

#[cfg(windows)]
pub type PlatformProcessManager = modeldriver_windows::WindowsProcessManager;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    type Manager = PlatformProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return modeldriver_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return modeldriver_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return modeldriver_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return modeldriver_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// A model driver backed by this platform's process manager
pub type PlatformModelDriver = ModelDriver<PlatformProcessManager>;

/// Build a driver for `config` on the current platform
pub fn model_driver(config: ModelDriverConfig) -> Result<PlatformModelDriver, DriverError> {
    ModelDriver::new(
        config,
        Arc::new(PlatformProcessManagerFactory::create_process_manager()),
    )
}

/// Like [`model_driver`], forwarding model output to the given sinks
pub fn model_driver_with_buffers(
    config: ModelDriverConfig,
    out: DriverStdOut,
    err: DriverStdErr,
) -> Result<PlatformModelDriver, DriverError> {
    ModelDriver::new_with_buffers(
        config,
        Arc::new(PlatformProcessManagerFactory::create_process_manager()),
        out,
        err,
    )
}

/// Install a `RUST_LOG`-filtered subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// Re-export core functionality
pub use modeldriver_core::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformProcessManagerFactory::platform_name();
        assert!(!platform.is_empty());
        assert_eq!(TargetPlatform::current().is_windows(), cfg!(windows));

        let _manager = PlatformProcessManagerFactory::create_process_manager();
    }

    #[test]
    fn test_model_driver_validates_config() {
        let config = ModelDriverConfig::builder()
            .name("bad")
            .args(["model"])
            .with_strace(true)
            .with_valgrind(true)
            .build()
            .unwrap();

        let err = model_driver(config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
