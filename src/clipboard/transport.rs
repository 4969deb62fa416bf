//! Channel Transport Glue
//!
//! The clipboard core only needs two things from the virtual channel layer:
//! a way to send an encoded PDU and a stream of inbound PDUs. [`ChannelSink`]
//! and [`spawn_inbound_pump`] provide both over tokio channels.

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::session::ClipboardSession;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outbound side of the clipboard channel
#[cfg_attr(test, mockall::automock)]
pub trait PduSink: Send + Sync {
    /// Queue one encoded PDU; [`ClipboardError::ChannelClosed`] when the link is gone
    fn send_pdu(&self, pdu: Bytes) -> Result<()>;
}

/// [`PduSink`] backed by an unbounded tokio channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Option<UnboundedSender<Bytes>>>,
}

impl ChannelSink {
    /// Wrap an existing sender
    pub fn new(tx: UnboundedSender<Bytes>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Drop the sender so the peer's inbound stream ends
    pub fn close(&self) {
        if self.tx.lock().take().is_some() {
            debug!("Clipboard channel sink closed");
        }
    }
}

impl PduSink for ChannelSink {
    fn send_pdu(&self, pdu: Bytes) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(ClipboardError::ChannelClosed)?;
        tx.send(pdu).map_err(|_| ClipboardError::ChannelClosed)
    }
}

/// Create a sink and the receiver the peer reads from
pub fn channel_pair() -> (Arc<ChannelSink>, UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink::new(tx)), rx)
}

/// Feed inbound PDUs to `session` in arrival order
///
/// Each PDU is handled on the blocking pool since handlers touch the native
/// clipboard. When the stream ends the session is told the channel closed.
pub fn spawn_inbound_pump(session: Arc<ClipboardSession>, mut rx: UnboundedReceiver<Bytes>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(pdu) = rx.recv().await {
            let handler = Arc::clone(&session);
            if let Err(e) = tokio::task::spawn_blocking(move || handler.handle_inbound(&pdu)).await {
                warn!(session = %session.id(), "Inbound clipboard handler failed: {}", e);
            }
        }

        info!(session = %session.id(), "Clipboard channel ended");
        let handler = Arc::clone(&session);
        if let Err(e) = tokio::task::spawn_blocking(move || handler.channel_closed()).await {
            warn!(session = %session.id(), "Channel teardown failed: {}", e);
        }
    })
}
