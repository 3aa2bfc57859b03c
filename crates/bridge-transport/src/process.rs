//! Process-boundary transport over a pair of async byte streams.

use std::sync::{Mutex, PoisonError};

use bridge_core::{InboundEnvelope, InboundSink, OutboundEnvelope, Transport, TransportError};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    process::Child,
    runtime::Handle,
    sync::mpsc,
};
use tokio_stream::{StreamExt, wrappers::LinesStream};

use crate::protocol::{decode_line, encode_line};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Unbound {
    reader: BoxedReader,
    writer: BoxedWriter,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

/// Transport that exchanges line-delimited JSON with another process.
///
/// Emitting only queues the encoded line; a writer task started on `bind`
/// performs the actual I/O, and a reader task routes inbound lines.
pub struct ProcessTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    unbound: Mutex<Option<Unbound>>,
}

impl ProcessTransport {
    /// Create a transport reading from `reader` and writing to `writer`.
    #[must_use]
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            outbound_tx,
            unbound: Mutex::new(Some(Unbound {
                reader: Box::new(reader),
                writer: Box::new(writer),
                outbound_rx,
            })),
        }
    }

    /// Talk to a spawned native process over its stdin/stdout.
    ///
    /// # Errors
    /// Returns error if the child was not spawned with piped stdio.
    pub fn from_child(child: &mut Child) -> Result<Self, TransportError> {
        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;
        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        Ok(Self::new(stdout, stdin))
    }

    /// Talk to the parent process over this process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Transport for ProcessTransport {
    fn emit(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        let line = encode_line(&envelope)?;
        self.outbound_tx
            .send(line)
            .map_err(|_| TransportError::Closed)
    }

    fn bind(&self, inbound: InboundSink) -> Result<(), TransportError> {
        let handle = Handle::try_current().map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        let Unbound {
            reader,
            mut writer,
            mut outbound_rx,
        } = self
            .unbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::AlreadyBound)?;

        handle.spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if let Err(e) = write_line(&mut writer, &line).await {
                    tracing::error!("Failed to write to native process: {e}");
                    break;
                }
            }
        });

        handle.spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(reader).lines());
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => match decode_line::<InboundEnvelope>(&line) {
                        Ok(Some(envelope)) => inbound.receive(envelope),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Invalid inbound envelope: {e}"),
                    },
                    Err(e) => {
                        tracing::error!("Error reading from native process: {e}");
                        break;
                    }
                }
            }
            tracing::debug!("Native process stream closed");
        });

        Ok(())
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
