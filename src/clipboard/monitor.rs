//! Clipboard Monitor
//!
//! Owns the session's native clipboard subscription and the single thread
//! that handles everything arriving on it. Native notifications and
//! session-internal events are modelled as one typed event stream consumed
//! sequentially, the way a window procedure would see them.
//!
//! `stop` and `restart` detach and reattach the listener around events that
//! suspend the session without destroying its state. Detaching never touches
//! the clipboard lock, so it succeeds even while another process holds the
//! clipboard open.

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::native::NativeNotification;
use crate::clipboard::session::ClipboardSession;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Events consumed by the monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Something the OS delivered to our listener
    Native(NativeNotification),
    /// The remote list with this generation should be mirrored locally
    InstallMirror {
        /// Remote format list generation
        generation: u64,
    },
    /// The channel is gone; detach and exit
    ChannelClosed,
    /// Detach and exit
    Stop,
}

struct Running {
    events: Sender<MonitorEvent>,
    thread: JoinHandle<()>,
}

/// Listener lifecycle for one session
pub struct ClipboardMonitor {
    session: Arc<ClipboardSession>,
    running: Option<Running>,
}

impl std::fmt::Debug for ClipboardMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardMonitor")
            .field("session", &self.session.id())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ClipboardMonitor {
    /// Monitor for `session`; nothing is attached until [`ClipboardMonitor::start`]
    pub fn new(session: Arc<ClipboardSession>) -> Self {
        Self {
            session,
            running: None,
        }
    }

    /// Session being monitored
    pub fn session(&self) -> &Arc<ClipboardSession> {
        &self.session
    }

    /// Whether the listener is attached and the thread alive
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.thread.is_finished())
    }

    /// Subscribe to the native clipboard and start dispatching
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if self.session.is_torn_down() {
            return Err(ClipboardError::InvalidState("session is torn down".into()));
        }
        // A thread that exited on its own still needs joining
        self.stop();

        let listener = self.session.listener();
        let (native_tx, native_rx) = unbounded();
        self.session.native().add_listener(listener, native_tx)?;

        let (events_tx, events_rx) = unbounded();
        self.session.attach_monitor(events_tx.clone());

        let session = Arc::clone(&self.session);
        let spawned = std::thread::Builder::new()
            .name(format!("cliprdr-monitor-{}", self.session.id()))
            .spawn(move || run(session, events_rx, native_rx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.session.detach_monitor();
                self.session.native().remove_listener(listener);
                return Err(ClipboardError::Native(format!("failed to spawn monitor thread: {}", e)));
            }
        };

        self.running = Some(Running {
            events: events_tx,
            thread,
        });
        info!(session = %self.session.id(), %listener, "Clipboard monitor started");

        self.session.resync_mirror();
        Ok(())
    }

    /// Detach the listener and join the thread; a no-op when not running
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        self.session.detach_monitor();
        self.session.native().remove_listener(self.session.listener());
        // The thread may already have exited after a channel close
        let _ = running.events.send(MonitorEvent::Stop);

        if running.thread.join().is_err() {
            warn!(session = %self.session.id(), "Clipboard monitor thread panicked");
        }
        info!(session = %self.session.id(), "Clipboard monitor stopped");
    }

    /// Stop then start, keeping session state
    pub fn restart(&mut self) -> Result<()> {
        debug!(session = %self.session.id(), "Restarting clipboard monitor");
        self.stop();
        self.start()
    }
}

impl Drop for ClipboardMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(session: Arc<ClipboardSession>, events: Receiver<MonitorEvent>, natives: Receiver<NativeNotification>) {
    debug!(session = %session.id(), "Clipboard monitor loop running");

    loop {
        let event = select! {
            recv(events) -> msg => msg.unwrap_or(MonitorEvent::Stop),
            recv(natives) -> msg => match msg {
                Ok(notification) => MonitorEvent::Native(notification),
                Err(_) => MonitorEvent::Stop,
            },
        };
        trace!(session = %session.id(), ?event, "Clipboard monitor event");

        match event {
            MonitorEvent::Native(notification) => dispatch(&session, notification),
            MonitorEvent::InstallMirror { generation } => session.install_mirror(generation),
            MonitorEvent::ChannelClosed => {
                session.reset_role();
                session.native().remove_listener(session.listener());
                info!(session = %session.id(), "Clipboard monitor exiting after channel close");
                break;
            }
            MonitorEvent::Stop => break,
        }
    }

    debug!(session = %session.id(), "Clipboard monitor loop finished");
}

fn dispatch(session: &ClipboardSession, notification: NativeNotification) {
    match notification {
        NativeNotification::ClipboardUpdate { sequence } => session.on_local_change(sequence),
        NativeNotification::RenderFormat { format_id } => session.on_render_format(format_id),
        NativeNotification::RenderAllFormats => session.on_render_all(),
    }
}
