use crate::output::LineCodec;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>;

/// Either of the supervisor's output streams
#[derive(Clone, derive_more::From)]
pub enum DriverStdio {
    Out(DriverStdOut),
    Err(DriverStdErr),
}

impl DriverStdio {
    pub fn inner(&self) -> SharedWriter {
        match self {
            DriverStdio::Out(out) => out.inner(),
            DriverStdio::Err(err) => err.inner(),
        }
    }

    /// Write one line and flush, so output interleaves the way the model produced it
    pub async fn forward(&self, line: &str) -> tokio::io::Result<()> {
        let inner = self.inner();
        let mut writer = inner.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

/// Where forwarded model output ends up; the supervisor's stdout by default
pub struct DriverStdOut(SharedWriter);

impl Clone for DriverStdOut {
    fn clone(&self) -> Self {
        DriverStdOut(self.0.clone())
    }
}

impl Default for DriverStdOut {
    fn default() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }
}

impl DriverStdOut {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> DriverStdOut {
        DriverStdOut(Arc::new(Mutex::new(t)))
    }

    pub fn inner(&self) -> SharedWriter {
        self.0.clone()
    }
}

/// Where captured model stderr ends up; the supervisor's stderr by default
pub struct DriverStdErr(SharedWriter);

impl Clone for DriverStdErr {
    fn clone(&self) -> Self {
        DriverStdErr(self.0.clone())
    }
}

impl Default for DriverStdErr {
    fn default() -> Self {
        Self::new(Box::new(tokio::io::stderr()))
    }
}

impl DriverStdErr {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> DriverStdErr {
        DriverStdErr(Arc::new(Mutex::new(t)))
    }

    pub fn inner(&self) -> SharedWriter {
        self.0.clone()
    }
}

/// Copy a byte stream line by line into `out` until it ends.
pub async fn stream<A: AsyncRead + Unpin>(
    io: A,
    out: impl Into<DriverStdio>,
) -> tokio::io::Result<()> {
    let out = out.into();
    let mut frames = FramedRead::with_capacity(io, LineCodec::default(), 1024);
    while let Some(frame) = frames.next().await {
        out.forward(&frame?).await?;
    }
    Ok(())
}
