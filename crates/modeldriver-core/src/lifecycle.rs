use crate::driver::ModelDriver;
use crate::error::DriverError;
use crate::process::ProcessLifecycle;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What an orchestrator needs from a supervised component
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &str;

    /// Bring up whatever the component runs
    async fn start(&self) -> Result<(), DriverError>;

    /// Supervise until the component finishes or is terminated
    async fn run(&self);

    /// External cancellation. Converges on the same shutdown as a finished run.
    async fn terminate(&self);

    /// Wait for the terminal state; returns whether it was reached in time
    async fn wait_terminated(&self, timeout: Duration) -> bool;
}

#[async_trait]
impl<M: ProcessLifecycle + 'static> Lifecycle for ModelDriver<M> {
    fn name(&self) -> &str {
        ModelDriver::name(self)
    }

    async fn start(&self) -> Result<(), DriverError> {
        ModelDriver::start(self).await
    }

    async fn run(&self) {
        ModelDriver::run(self).await
    }

    async fn terminate(&self) {
        ModelDriver::terminate(self).await
    }

    async fn wait_terminated(&self, timeout: Duration) -> bool {
        ModelDriver::wait_terminated(self, timeout).await
    }
}

/// Start `component` and run it on a background task.
///
/// Start failures are returned here; the returned handle completes once
/// the run has finalized.
pub async fn supervise<L: Lifecycle + ?Sized + 'static>(
    component: Arc<L>,
) -> Result<JoinHandle<()>, DriverError> {
    component.start().await?;
    tracing::debug!(component = component.name(), "Supervising");
    Ok(tokio::spawn(async move { component.run().await }))
}
