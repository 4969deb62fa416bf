//! Render Broker
//!
//! Turns an OS "render format F now" request into a Format Data Request on the
//! channel and blocks the calling thread until the matching response arrives,
//! the bound elapses or the channel closes.
//!
//! # Mailbox
//!
//! The protocol carries no request id and the peer answers in order, so each
//! session has a single-slot mailbox keyed by a monotonic sequence number.
//! Requests are serialized by a fetch gate: a second render waits for the
//! first to finish. A request that times out, or that a newer remote format
//! list supersedes, becomes an orphan; the next inbound response is consumed
//! by the oldest orphan instead of reaching a newer request. Orphans expire
//! after a TTL so a peer that never answers cannot poison the mailbox.
//!
//! No clipboard lock is held here. Callers acquire it only after
//! [`RenderBroker::request_render`] returns.

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::pdu::{ClipboardPdu, FormatDataResponse};
use crate::clipboard::session::SessionConfig;
use crate::clipboard::transport::PduSink;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Snapshot of the request currently owning the mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRenderRequest {
    /// Format being fetched (remote id)
    pub format_id: u32,
    /// Still waiting for the peer
    pub awaiting: bool,
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    format_id: u32,
    outcome: Option<Result<Bytes>>,
}

#[derive(Debug, Default)]
struct Mailbox {
    pending: Option<Pending>,
    /// Abandoned requests whose replies may still arrive, oldest first
    orphans: VecDeque<(u64, Instant)>,
    closed: bool,
}

impl Mailbox {
    fn expire_orphans(&mut self, ttl: Duration) {
        let now = Instant::now();
        while let Some((seq, abandoned_at)) = self.orphans.front().copied() {
            if now.duration_since(abandoned_at) < ttl {
                break;
            }
            trace!(seq, "Orphaned render request expired");
            self.orphans.pop_front();
        }
    }
}

/// Per-session remote fetch coordinator
pub struct RenderBroker {
    sink: Arc<dyn PduSink>,
    timeout: Duration,
    orphan_ttl: Duration,
    max_data_size: usize,
    fetch_gate: Mutex<()>,
    mailbox: Mutex<Mailbox>,
    delivered: Condvar,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for RenderBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBroker")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending())
            .finish()
    }
}

impl RenderBroker {
    /// Create a broker sending requests through `sink`
    pub fn new(sink: Arc<dyn PduSink>, config: &SessionConfig) -> Self {
        Self {
            sink,
            timeout: config.render_timeout,
            orphan_ttl: config.stale_reply_ttl,
            max_data_size: config.max_data_size,
            fetch_gate: Mutex::new(()),
            mailbox: Mutex::new(Mailbox::default()),
            delivered: Condvar::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Fetch the bytes of `format_id` from the remote side
    ///
    /// Blocks for at most the render timeout once the fetch gate is held; the
    /// gate itself is awaited for at most the same bound.
    pub fn request_render(&self, format_id: u32) -> Result<Bytes> {
        let Some(_gate) = self.fetch_gate.try_lock_for(self.timeout) else {
            warn!(format_id, "Render queued behind another fetch for too long");
            return Err(self.timeout_error(format_id));
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut mailbox = self.mailbox.lock();
            if mailbox.closed {
                return Err(ClipboardError::ChannelClosed);
            }
            mailbox.expire_orphans(self.orphan_ttl);
            mailbox.pending = Some(Pending {
                seq,
                format_id,
                outcome: None,
            });
        }

        debug!(seq, format_id, "Requesting format data from remote");
        if let Err(e) = self.sink.send_pdu(ClipboardPdu::FormatDataRequest { format_id }.encode()) {
            warn!(seq, format_id, "Failed to send format data request: {}", e);
            let mut mailbox = self.mailbox.lock();
            if mailbox.pending.as_ref().is_some_and(|p| p.seq == seq) {
                mailbox.pending = None;
            }
            return Err(ClipboardError::ChannelClosed);
        }

        let deadline = Instant::now() + self.timeout;
        let mut mailbox = self.mailbox.lock();
        loop {
            let ready = mailbox
                .pending
                .as_mut()
                .filter(|p| p.seq == seq)
                .and_then(|p| p.outcome.take());
            if let Some(outcome) = ready {
                mailbox.pending = None;
                return outcome;
            }
            if mailbox.pending.as_ref().map_or(true, |p| p.seq != seq) {
                // Slot was taken over; should not happen while the gate is held
                return Err(ClipboardError::Superseded(format_id));
            }

            if self.delivered.wait_until(&mut mailbox, deadline).timed_out() {
                let late = mailbox
                    .pending
                    .as_mut()
                    .filter(|p| p.seq == seq)
                    .and_then(|p| p.outcome.take());
                mailbox.pending = None;
                if let Some(outcome) = late {
                    return outcome;
                }

                mailbox.orphans.push_back((seq, Instant::now()));
                warn!(seq, format_id, timeout_ms = self.timeout.as_millis() as u64, "Render timed out");
                return Err(self.timeout_error(format_id));
            }
        }
    }

    /// Hand an inbound Format Data Response to the waiting request
    ///
    /// Returns `false` when the reply was stale or unsolicited and dropped.
    pub fn deliver(&self, response: FormatDataResponse) -> bool {
        let mut mailbox = self.mailbox.lock();
        mailbox.expire_orphans(self.orphan_ttl);

        if let Some((seq, _)) = mailbox.orphans.pop_front() {
            debug!(seq, len = response.data.len(), "Dropping stale format data response");
            return false;
        }

        let Some(pending) = mailbox.pending.as_mut().filter(|p| p.outcome.is_none()) else {
            debug!(len = response.data.len(), "Dropping unsolicited format data response");
            return false;
        };

        // A zero-length payload means failure whatever the flags say
        let outcome = if !response.ok || response.data.is_empty() {
            Err(ClipboardError::RemoteFailure(pending.format_id))
        } else if response.data.len() > self.max_data_size {
            Err(ClipboardError::DataSizeExceeded(response.data.len(), self.max_data_size))
        } else {
            Ok(response.data)
        };
        trace!(seq = pending.seq, ok = outcome.is_ok(), "Format data delivered");
        pending.outcome = Some(outcome);
        drop(mailbox);

        self.delivered.notify_all();
        true
    }

    /// A newer remote format list arrived; fail the in-flight request
    pub fn invalidate(&self) {
        let mut mailbox = self.mailbox.lock();
        let Some(pending) = mailbox.pending.as_mut() else {
            return;
        };
        if pending.outcome.is_some() {
            return;
        }

        let seq = pending.seq;
        pending.outcome = Some(Err(ClipboardError::Superseded(pending.format_id)));
        mailbox.orphans.push_back((seq, Instant::now()));
        drop(mailbox);

        debug!(seq, "In-flight render superseded by new format list");
        self.delivered.notify_all();
    }

    /// Channel is gone; fail the in-flight request and refuse new ones
    pub fn close(&self) {
        let mut mailbox = self.mailbox.lock();
        mailbox.closed = true;
        mailbox.orphans.clear();
        if let Some(pending) = mailbox.pending.as_mut().filter(|p| p.outcome.is_none()) {
            pending.outcome = Some(Err(ClipboardError::ChannelClosed));
        }
        drop(mailbox);

        self.delivered.notify_all();
    }

    /// Whether [`RenderBroker::close`] was called
    pub fn is_closed(&self) -> bool {
        self.mailbox.lock().closed
    }

    /// The request currently in the mailbox
    pub fn pending(&self) -> Option<PendingRenderRequest> {
        self.mailbox.lock().pending.as_ref().map(|p| PendingRenderRequest {
            format_id: p.format_id,
            awaiting: p.outcome.is_none(),
        })
    }

    /// Number of abandoned requests still expecting a late reply
    pub fn orphan_count(&self) -> usize {
        let mut mailbox = self.mailbox.lock();
        mailbox.expire_orphans(self.orphan_ttl);
        mailbox.orphans.len()
    }

    fn timeout_error(&self, format_id: u32) -> ClipboardError {
        ClipboardError::Timeout {
            format_id,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::transport::MockPduSink;
    use crossbeam_channel::{unbounded, Receiver, Sender};

    struct RecordingSink(Sender<Bytes>);

    impl PduSink for RecordingSink {
        fn send_pdu(&self, pdu: Bytes) -> Result<()> {
            self.0.send(pdu).map_err(|_| ClipboardError::ChannelClosed)
        }
    }

    fn config(timeout_ms: u64) -> SessionConfig {
        SessionConfig {
            render_timeout: Duration::from_millis(timeout_ms),
            ..SessionConfig::default()
        }
    }

    fn broker(timeout_ms: u64) -> (Arc<RenderBroker>, Receiver<Bytes>) {
        let (tx, rx) = unbounded();
        let broker = RenderBroker::new(Arc::new(RecordingSink(tx)), &config(timeout_ms));
        (Arc::new(broker), rx)
    }

    fn requested_format(pdu: &Bytes) -> u32 {
        match ClipboardPdu::decode(pdu).unwrap() {
            ClipboardPdu::FormatDataRequest { format_id } => format_id,
            other => panic!("Expected FormatDataRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_is_returned() {
        let (broker, rx) = broker(2000);
        let remote = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                let pdu = rx.recv().unwrap();
                assert_eq!(requested_format(&pdu), 13);
                assert!(broker.pending().unwrap().awaiting);
                assert!(broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"ok"))));
            })
        };

        assert_eq!(broker.request_render(13).unwrap().as_ref(), b"ok");
        remote.join().unwrap();
        assert!(broker.pending().is_none());
    }

    #[test]
    fn test_failure_response_is_remote_failure() {
        let (broker, rx) = broker(2000);
        let remote = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                rx.recv().unwrap();
                broker.deliver(FormatDataResponse::fail());
            })
        };

        assert_eq!(broker.request_render(1), Err(ClipboardError::RemoteFailure(1)));
        remote.join().unwrap();
    }

    #[test]
    fn test_empty_ok_response_is_remote_failure() {
        let (broker, rx) = broker(2000);
        let remote = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                rx.recv().unwrap();
                let wire = ClipboardPdu::FormatDataResponse(FormatDataResponse::ok(Bytes::new())).encode();
                match ClipboardPdu::decode(&wire).unwrap() {
                    ClipboardPdu::FormatDataResponse(response) => assert!(broker.deliver(response)),
                    other => panic!("Expected FormatDataResponse, got {:?}", other),
                }
            })
        };

        assert_eq!(broker.request_render(13), Err(ClipboardError::RemoteFailure(13)));
        remote.join().unwrap();
        assert!(broker.pending().is_none());
    }

    #[test]
    fn test_timeout_is_bounded_and_late_reply_dropped() {
        let (broker, rx) = broker(50);

        let started = Instant::now();
        let err = broker.request_render(13).unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, ClipboardError::Timeout { format_id: 13, .. }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000));
        assert_eq!(broker.orphan_count(), 1);
        rx.recv().unwrap();

        // The late reply for the abandoned request must not reach the next one
        assert!(!broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"late"))));
        assert_eq!(broker.orphan_count(), 0);

        let remote = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                rx.recv().unwrap();
                broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"fresh")));
            })
        };
        assert_eq!(broker.request_render(1).unwrap().as_ref(), b"fresh");
        remote.join().unwrap();
    }

    #[test]
    fn test_orphans_expire() {
        let (tx, _rx) = unbounded();
        let broker = RenderBroker::new(
            Arc::new(RecordingSink(tx)),
            &SessionConfig {
                render_timeout: Duration::from_millis(10),
                stale_reply_ttl: Duration::from_millis(20),
                ..SessionConfig::default()
            },
        );

        assert!(broker.request_render(1).is_err());
        assert_eq!(broker.orphan_count(), 1);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(broker.orphan_count(), 0);
    }

    #[test]
    fn test_second_render_waits_for_first() {
        let (broker, rx) = broker(2000);

        let first = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.request_render(13))
        };
        assert_eq!(requested_format(&rx.recv().unwrap()), 13);

        let second = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.request_render(1))
        };

        // Only one request on the wire until the first is answered
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(broker.pending().unwrap().format_id, 13);

        assert!(broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"one"))));
        assert_eq!(requested_format(&rx.recv().unwrap()), 1);
        assert!(broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"two"))));

        assert_eq!(first.join().unwrap().unwrap().as_ref(), b"one");
        assert_eq!(second.join().unwrap().unwrap().as_ref(), b"two");
    }

    #[test]
    fn test_invalidate_supersedes_in_flight() {
        let (broker, rx) = broker(2000);
        let waiter = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.request_render(13))
        };
        rx.recv().unwrap();

        broker.invalidate();
        assert_eq!(waiter.join().unwrap(), Err(ClipboardError::Superseded(13)));

        // Reply to the superseded request is swallowed
        assert!(!broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"old"))));
    }

    #[test]
    fn test_close_fails_pending_and_future_renders() {
        let (broker, rx) = broker(5000);
        let waiter = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.request_render(13))
        };
        rx.recv().unwrap();

        let started = Instant::now();
        broker.close();
        assert_eq!(waiter.join().unwrap(), Err(ClipboardError::ChannelClosed));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(broker.is_closed());
        assert_eq!(broker.request_render(1), Err(ClipboardError::ChannelClosed));
    }

    #[test]
    fn test_oversized_reply_is_rejected() {
        let (tx, rx) = unbounded();
        let broker = Arc::new(RenderBroker::new(
            Arc::new(RecordingSink(tx)),
            &SessionConfig {
                max_data_size: 4,
                ..SessionConfig::default()
            },
        ));
        let remote = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                rx.recv().unwrap();
                broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"too long")));
            })
        };

        assert_eq!(broker.request_render(13), Err(ClipboardError::DataSizeExceeded(8, 4)));
        remote.join().unwrap();
    }

    #[test]
    fn test_unsolicited_reply_is_dropped() {
        let mut sink = MockPduSink::new();
        sink.expect_send_pdu().never();
        let broker = RenderBroker::new(Arc::new(sink), &SessionConfig::default());
        assert!(!broker.deliver(FormatDataResponse::ok(Bytes::from_static(b"?"))));
    }

    #[test]
    fn test_send_failure_is_channel_closed() {
        let mut sink = MockPduSink::new();
        sink.expect_send_pdu()
            .times(1)
            .returning(|_| Err(ClipboardError::ChannelClosed));
        let broker = RenderBroker::new(Arc::new(sink), &SessionConfig::default());

        assert_eq!(broker.request_render(13), Err(ClipboardError::ChannelClosed));
        assert!(broker.pending().is_none());
    }
}
