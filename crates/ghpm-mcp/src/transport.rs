//! Newline-delimited JSON over async byte streams.
//!
//! Reading happens on the server loop; writing is owned by a single task fed
//! through a channel so concurrent tool calls never interleave output lines.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{IncomingMessage, JsonRpcResponse};

/// Reads one JSON-RPC message per line.
pub struct MessageReader<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next message, skipping blank lines. `Ok(None)` on EOF.
    ///
    /// Undecodable lines yield an `InvalidData` error; the stream stays usable.
    pub async fn read_message(&mut self) -> io::Result<Option<IncomingMessage>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!(message = line, "Received");
            return IncomingMessage::parse(line).map(Some).map_err(|e| {
                warn!(error = %e, "Invalid JSON-RPC message");
                io::Error::new(io::ErrorKind::InvalidData, e.to_string())
            });
        }
    }
}

/// Sending half of the response channel.
pub type ResponseSender = mpsc::UnboundedSender<JsonRpcResponse>;

/// Spawn the task that writes every response sent on the returned channel.
///
/// The task ends once all senders are dropped, or on the first write error.
pub fn spawn_writer<W>(mut writer: W) -> (ResponseSender, JoinHandle<io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

    let handle = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_string(&response)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            debug!(message = %line, "Sending");
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    });

    (tx, handle)
}
