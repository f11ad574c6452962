use crate::state::LifecycleState;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, error};

/// One item on a driver's output channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// A decoded line, including its trailing newline if the model wrote one
    Text(String),
    /// No more output will ever arrive. Always the last item, sent once.
    Sentinel,
}

impl OutputLine {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, OutputLine::Sentinel)
    }
}

impl From<String> for OutputLine {
    fn from(line: String) -> Self {
        OutputLine::Text(line)
    }
}

/// Longest line buffered before a partial line is flushed
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Splits a byte stream on `\n`, keeping the newline. Invalid UTF-8 is
/// replaced rather than rejected. A trailing partial line is emitted at EOF,
/// and a line longer than `max_length` is emitted in pieces.
#[derive(Debug)]
pub struct LineCodec {
    next_index: usize,
    max_length: usize,
}

impl LineCodec {
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length: max_length.max(4),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }
}

/// Back off from `at` so a multi-byte UTF-8 sequence is not cut in half.
fn char_boundary(buf: &[u8], at: usize) -> usize {
    let mut end = at;
    while end > at.saturating_sub(3) && (buf[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    end
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                let line = src.split_to(end);
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None if src.len() > self.max_length => {
                self.next_index = 0;
                let end = char_boundary(src, self.max_length);
                let piece = src.split_to(end);
                Ok(Some(String::from_utf8_lossy(&piece).into_owned()))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

/// Background worker draining a model's stdout into the output channel.
pub struct OutputPump;

impl OutputPump {
    /// Start pumping `reader` into `tx` until end of stream, a read error, or
    /// the driver's kill completing. Whatever stops it, the pump marks
    /// `exit_observed` and sends [`OutputLine::Sentinel`] as its final item.
    pub fn spawn<R>(
        name: String,
        reader: R,
        tx: UnboundedSender<OutputLine>,
        state: Arc<LifecycleState>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(pump(name, reader, tx, state))
    }
}

async fn pump<R: AsyncRead + Unpin>(
    name: String,
    reader: R,
    tx: UnboundedSender<OutputLine>,
    state: Arc<LifecycleState>,
) {
    let mut frames = FramedRead::new(reader, LineCodec::default());

    loop {
        let frame = tokio::select! {
            biased;
            _ = state.kill_complete.wait() => {
                debug!(model = %name, "Kill completed, stopping output pump");
                break;
            }
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(line)) => {
                if tx.send(OutputLine::Text(line)).is_err() {
                    debug!(model = %name, "Output consumer dropped");
                    break;
                }
            }
            Some(Err(e)) => {
                error!(model = %name, "Error getting output: {}", e);
                break;
            }
            None => {
                debug!(model = %name, "End of model output");
                break;
            }
        }
    }

    state.exit_observed.set();
    let _ = tx.send(OutputLine::Sentinel);
    drop(frames);
}
