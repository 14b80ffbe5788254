// Outbound aux message queue and its single drainer
//
// Insertion order is delivery order. Each message gets one write attempt;
// a failed write is logged and the message dropped.

use std::io::Write;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::run_blocking;
use crate::error::ErrorKind;
use crate::status::NoticeSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Outbound queue closed")]
pub struct QueueClosed;

impl QueueClosed {
    /// The drainer only goes away with the aux link
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

/// Producer side, cloned into event handlers
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl OutboundQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, message: Vec<u8>) -> Result<(), QueueClosed> {
        self.tx.send(message).map_err(|_| QueueClosed)
    }
}

/// Write queued messages to the aux link in order until every producer is gone.
///
/// Writes run on the blocking pool and are bounded by the port's timeout.
pub async fn drain<W>(mut messages: mpsc::UnboundedReceiver<Vec<u8>>, writer: W, notices: NoticeSink)
where
    W: Write + Send + 'static,
{
    let mut writer = writer;
    info!("Aux drainer started");

    while let Some(message) = messages.recv().await {
        let bytes = message.clone();
        let step = run_blocking(writer, move |w| {
            w.write_all(&bytes)?;
            w.flush()
        })
        .await;

        match step {
            Ok((w, Ok(()))) => {
                writer = w;
                debug!("Sent aux message {:02X?}", message);
                notices.status("SENT AUX");
            }
            Ok((w, Err(e))) => {
                writer = w;
                warn!(
                    "Dropping aux message {:02X?} ({}): {}",
                    message,
                    ErrorKind::Transport,
                    e
                );
            }
            Err(e) => {
                error!("Aux writer task failed ({}): {}", ErrorKind::Logic, e);
                return;
            }
        }
    }

    info!("Outbound queue closed, aux drainer stopped");
}
