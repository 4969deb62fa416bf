//! Clipboard Session
//!
//! Per-connection clipboard state: the native listener identity, the last
//! format lists exchanged in each direction, the installed mirror and the
//! render broker. Inbound PDUs are dispatched here from the transport; native
//! notifications arrive through the [`ClipboardMonitor`](super::ClipboardMonitor).

use crate::clipboard::error::{recovery_action, ClipboardError, RecoveryAction, Result};
use crate::clipboard::file_list::{encode_file_descriptors, FileDescriptor, FileDropList};
use crate::clipboard::formats::format_id::CF_HDROP;
use crate::clipboard::formats::format_name::{FILE_CONTENTS, FILE_GROUP_DESCRIPTOR_W};
use crate::clipboard::formats::{build_local_format_list, FormatList};
use crate::clipboard::mirror::{self, DataObjectHandle};
use crate::clipboard::monitor::MonitorEvent;
use crate::clipboard::native::{ClipboardLock, ListenerId, NativeClipboard};
use crate::clipboard::ownership::{ClipboardRole, OwnershipTracker};
use crate::clipboard::pdu::{ClipboardPdu, FormatDataResponse};
use crate::clipboard::render::RenderBroker;
use crate::clipboard::transport::PduSink;
use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Runtime settings of one clipboard session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bound on a single remote render
    pub render_timeout: Duration,
    /// How long an abandoned request may still claim a late reply
    pub stale_reply_ttl: Duration,
    /// Largest payload accepted or sent
    pub max_data_size: usize,
    /// Substitute `CF_HDROP` with the file descriptor pair and mirror remote file lists
    pub enable_file_lists: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_millis(3000),
            stale_reply_ttl: Duration::from_millis(30_000),
            max_data_size: 16 * 1024 * 1024, // 16MB
            enable_file_lists: true,
        }
    }
}

impl From<&crate::config::ClipboardConfig> for SessionConfig {
    fn from(config: &crate::config::ClipboardConfig) -> Self {
        Self {
            render_timeout: config.render_timeout(),
            stale_reply_ttl: config.stale_reply_ttl(),
            max_data_size: config.max_data_size,
            enable_file_lists: config.enable_file_lists,
        }
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    formats: FormatList,
    generation: u64,
}

/// One redirected clipboard
pub struct ClipboardSession {
    id: String,
    listener: ListenerId,
    config: SessionConfig,
    native: Arc<dyn NativeClipboard>,
    lock: Arc<ClipboardLock>,
    sink: Arc<dyn PduSink>,
    broker: Arc<RenderBroker>,
    tracker: Mutex<OwnershipTracker>,
    remote: Mutex<RemoteState>,
    local_advertised: Mutex<FormatList>,
    mirror: Mutex<Option<DataObjectHandle>>,
    monitor_tx: Mutex<Option<Sender<MonitorEvent>>>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for ClipboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardSession")
            .field("id", &self.id)
            .field("listener", &self.listener)
            .field("role", &self.role())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl ClipboardSession {
    /// Create a session bound to a native clipboard and an outbound channel
    pub fn new(
        id: impl Into<String>,
        native: Arc<dyn NativeClipboard>,
        lock: Arc<ClipboardLock>,
        sink: Arc<dyn PduSink>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let listener = ListenerId::next();
        let broker = Arc::new(RenderBroker::new(Arc::clone(&sink), &config));
        let id = id.into();
        info!(session = %id, %listener, "Clipboard session created");

        Arc::new(Self {
            id,
            listener,
            config,
            native,
            lock,
            sink,
            broker,
            tracker: Mutex::new(OwnershipTracker::new(listener)),
            remote: Mutex::new(RemoteState::default()),
            local_advertised: Mutex::new(FormatList::default()),
            mirror: Mutex::new(None),
            monitor_tx: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Native listener (and clipboard owner) identity of this session
    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current clipboard role
    pub fn role(&self) -> ClipboardRole {
        self.tracker.lock().role()
    }

    /// Render broker of this session
    pub fn broker(&self) -> &Arc<RenderBroker> {
        &self.broker
    }

    /// The channel closed and the session no longer bridges anything
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Formats last advertised to the remote side
    pub fn local_formats(&self) -> FormatList {
        self.local_advertised.lock().clone()
    }

    /// Formats the remote side last advertised
    pub fn remote_formats(&self) -> FormatList {
        self.remote.lock().formats.clone()
    }

    /// Generation of the remote format list (bumped on every list)
    pub fn remote_generation(&self) -> u64 {
        self.remote.lock().generation
    }

    /// Mirror currently installed for the remote list
    pub fn current_mirror(&self) -> Option<DataObjectHandle> {
        self.mirror.lock().clone()
    }

    pub(crate) fn native(&self) -> &dyn NativeClipboard {
        self.native.as_ref()
    }

    pub(crate) fn lock(&self) -> &ClipboardLock {
        &self.lock
    }

    pub(crate) fn attach_monitor(&self, events: Sender<MonitorEvent>) {
        *self.monitor_tx.lock() = Some(events);
    }

    pub(crate) fn detach_monitor(&self) {
        self.monitor_tx.lock().take();
    }

    fn post(&self, event: MonitorEvent) -> bool {
        match self.monitor_tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn send(&self, pdu: ClipboardPdu) {
        trace!(session = %self.id, pdu = pdu.name(), "Sending clipboard PDU");
        if let Err(e) = self.sink.send_pdu(pdu.encode()) {
            warn!(session = %self.id, pdu = pdu.name(), "Failed to send clipboard PDU: {}", e);
        }
    }

    // === Inbound channel ===

    /// Dispatch one raw PDU from the channel
    ///
    /// Malformed PDUs are logged and discarded; the session stays up.
    pub fn handle_inbound(&self, raw: &[u8]) {
        if self.is_torn_down() {
            debug!(session = %self.id, "Dropping PDU for torn-down session");
            return;
        }

        let pdu = match ClipboardPdu::decode(raw) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!(session = %self.id, len = raw.len(), "Discarding clipboard PDU: {}", e);
                return;
            }
        };
        trace!(session = %self.id, pdu = pdu.name(), "Received clipboard PDU");

        match pdu {
            ClipboardPdu::FormatList(list) => self.on_remote_format_list(list),
            ClipboardPdu::FormatListResponse { ok } => {
                if ok {
                    debug!(session = %self.id, "Remote accepted format list");
                } else {
                    warn!(session = %self.id, "Remote rejected format list");
                }
            }
            ClipboardPdu::FormatDataRequest { format_id } => self.on_format_data_request(format_id),
            ClipboardPdu::FormatDataResponse(response) => self.on_format_data_response(response),
            ClipboardPdu::Unsupported { msg_type } => {
                debug!(session = %self.id, msg_type, "Ignoring unsupported clipboard PDU");
            }
        }
    }

    /// Remote clipboard changed
    pub fn on_remote_format_list(&self, list: FormatList) {
        let list = if self.config.enable_file_lists {
            list
        } else {
            list.iter()
                .filter(|f| f.name() != FILE_GROUP_DESCRIPTOR_W && f.name() != FILE_CONTENTS)
                .cloned()
                .collect()
        };

        let generation = {
            let mut remote = self.remote.lock();
            remote.formats = list.clone();
            remote.generation += 1;
            remote.generation
        };
        info!(session = %self.id, generation, count = list.len(), "Remote format list received");

        // Replies for the previous list must not reach the next reader
        self.broker.invalidate();
        self.send(ClipboardPdu::FormatListResponse { ok: true });

        if list.is_empty() {
            debug!(session = %self.id, "Remote clipboard empty, nothing to mirror");
            return;
        }
        if !self.post(MonitorEvent::InstallMirror { generation }) {
            debug!(session = %self.id, generation, "Monitor not running, mirror deferred");
        }
    }

    /// Remote wants the bytes of a format we advertised
    pub fn on_format_data_request(&self, format_id: u32) {
        let response = match self.render_local(format_id) {
            Ok(data) if data.is_empty() => {
                debug!(session = %self.id, format_id, "Local format is empty, answering with failure");
                FormatDataResponse::fail()
            }
            Ok(data) => {
                debug!(session = %self.id, format_id, len = data.len(), "Answering format data request");
                FormatDataResponse::ok(data)
            }
            Err(e) => {
                warn!(session = %self.id, format_id, "Cannot render format for remote: {}", e);
                FormatDataResponse::fail()
            }
        };
        self.send(ClipboardPdu::FormatDataResponse(response));
    }

    /// Remote answered our data request
    pub fn on_format_data_response(&self, response: FormatDataResponse) {
        if !self.broker.deliver(response) {
            debug!(session = %self.id, "Format data response not delivered");
        }
    }

    /// Transport is gone: fail pending renders and stop bridging
    pub fn channel_closed(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session = %self.id, "Clipboard channel closed, tearing session down");
        self.broker.close();
        self.post(MonitorEvent::ChannelClosed);
    }

    fn render_local(&self, format_id: u32) -> Result<Bytes> {
        let advertised = self.local_advertised.lock().clone();
        let descriptor = advertised
            .get(format_id)
            .ok_or(ClipboardError::UnknownFormat(format_id))?;

        let data = match descriptor.name() {
            FILE_GROUP_DESCRIPTOR_W => self.render_file_descriptors()?,
            FILE_CONTENTS => {
                return Err(ClipboardError::InvalidData("file contents streaming not supported".into()));
            }
            _ => {
                let clipboard = self.lock.open(self.native.as_ref(), self.listener)?;
                clipboard
                    .get_data(format_id)
                    .ok_or(ClipboardError::UnknownFormat(format_id))?
            }
        };

        if data.len() > self.config.max_data_size {
            return Err(ClipboardError::DataSizeExceeded(data.len(), self.config.max_data_size));
        }
        Ok(data)
    }

    fn render_file_descriptors(&self) -> Result<Bytes> {
        let raw = {
            let clipboard = self.lock.open(self.native.as_ref(), self.listener)?;
            clipboard
                .get_data(CF_HDROP)
                .ok_or(ClipboardError::UnknownFormat(CF_HDROP))?
        };

        let drop_list = FileDropList::decode(&raw)?;
        let descriptors: Vec<FileDescriptor> = drop_list
            .names()
            .iter()
            .map(|path| FileDescriptor::for_path(path, self.native.file_metadata(path)))
            .collect();
        debug!(session = %self.id, files = descriptors.len(), "Built file group descriptor");
        Ok(encode_file_descriptors(&descriptors))
    }

    // === Native notifications (monitor thread) ===

    /// Clipboard changed locally; advertise it unless it is our own echo
    pub fn on_local_change(&self, sequence: u32) {
        if self.is_torn_down() {
            return;
        }

        let advertise = {
            let _guard = self.lock.acquire();
            self.tracker.lock().should_advertise(self.native.as_ref(), sequence)
        };
        if !advertise {
            return;
        }

        let list = build_local_format_list(
            self.native.as_ref(),
            &self.lock,
            self.listener,
            self.config.enable_file_lists,
        );
        info!(session = %self.id, sequence, count = list.len(), "Advertising local clipboard change");

        self.broker.invalidate();
        self.tracker.lock().local_change(list.len());
        self.mirror.lock().take();
        *self.local_advertised.lock() = list.clone();
        self.send(ClipboardPdu::FormatList(list));
    }

    /// The OS needs data for a delayed-render format we own
    pub fn on_render_format(&self, format_id: u32) {
        let data = match self.current_mirror() {
            Some(mirror) => match mirror.render(format_id) {
                Ok(data) => data,
                Err(e) => {
                    let action = recovery_action(&e, 0, self.lock.retry_config());
                    warn!(session = %self.id, format_id, ?action, "Render failed: {}", e);
                    if action == RecoveryAction::TearDown {
                        self.channel_closed();
                    }
                    Bytes::new()
                }
            },
            None => {
                warn!(session = %self.id, format_id, "Render requested without an installed mirror");
                Bytes::new()
            }
        };

        // Bytes go to the OS only after the network wait is over
        let _guard = self.lock.acquire();
        if let Err(e) = self.native.set_data(format_id, Some(data)) {
            warn!(session = %self.id, format_id, "SetClipboardData failed: {}", e);
        }
    }

    /// We are about to lose clipboard ownership
    pub fn on_render_all(&self) {
        match self.lock.open(self.native.as_ref(), self.listener) {
            Ok(clipboard) => {
                if let Err(e) = clipboard.empty() {
                    warn!(session = %self.id, "EmptyClipboard failed: {}", e);
                }
            }
            Err(e) => warn!(session = %self.id, "Cannot open clipboard to render all formats: {}", e),
        }
        self.tracker.lock().reset();
        self.mirror.lock().take();
        debug!(session = %self.id, "Released delayed-render formats");
    }

    /// Install the mirror for remote list `generation` if it is still the latest
    pub fn install_mirror(&self, generation: u64) {
        let remote = {
            let remote = self.remote.lock();
            if remote.generation != generation {
                debug!(session = %self.id, generation, latest = remote.generation, "Skipping stale mirror install");
                return;
            }
            remote.formats.clone()
        };

        match mirror::install_mirror(self, &remote, generation) {
            Ok(handle) => trace!(session = %self.id, object = handle.object_id(), "Mirror ready"),
            Err(e) => warn!(session = %self.id, generation, "Failed to install mirror: {}", e),
        }
    }

    /// Remote content that arrived while no monitor ran still needs a mirror
    pub(crate) fn resync_mirror(&self) {
        let (generation, empty) = {
            let remote = self.remote.lock();
            (remote.generation, remote.formats.is_empty())
        };
        if generation > 0 && !empty && !self.is_torn_down() {
            self.post(MonitorEvent::InstallMirror { generation });
        }
    }

    pub(crate) fn set_mirror(&self, handle: DataObjectHandle, object_id: Option<u64>) {
        self.tracker.lock().mirror_installed(object_id);
        *self.mirror.lock() = Some(handle);
    }

    pub(crate) fn reset_role(&self) {
        self.tracker.lock().reset();
    }
}

impl Drop for ClipboardSession {
    fn drop(&mut self) {
        self.broker.close();
    }
}
