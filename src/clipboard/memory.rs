//! In-Memory Native Clipboard
//!
//! A process-local implementation of [`NativeClipboard`] that behaves like a
//! desktop clipboard manager: exclusive open, ownership by the last window to
//! empty it, delayed-render entries satisfied through the owner's listener,
//! lazily-fulfilled data objects and change notifications on close.
//!
//! Besides the trait it offers an "application" API (`copy`, `paste`,
//! `hold_open`, ...) so tests and the loopback binary can act as other local
//! programs.

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::file_list::{FileDropList, FileMetadata};
use crate::clipboard::formats::format_id::{CF_HDROP, CF_REGISTERED_START};
use crate::clipboard::native::{DataObject, ListenerId, NativeClipboard, NativeNotification};
use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long a reader waits for a delayed-render owner to supply data
const DEFAULT_RENDER_WAIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct State {
    open_by: Option<ListenerId>,
    owner: Option<ListenerId>,
    /// Stored formats in set order; `None` is a delayed-render placeholder
    entries: Vec<(u32, Option<Bytes>)>,
    data_object: Option<Arc<dyn DataObject>>,
    registered: Vec<String>,
    listeners: Vec<(ListenerId, Sender<NativeNotification>)>,
    sequence: u32,
    files: HashMap<String, FileMetadata>,
    dirty: bool,
}

impl State {
    fn entry(&self, format_id: u32) -> Option<&Option<Bytes>> {
        self.entries.iter().find(|(id, _)| *id == format_id).map(|(_, data)| data)
    }

    fn listener_for(&self, id: ListenerId) -> Option<Sender<NativeNotification>> {
        self.listeners
            .iter()
            .find(|(listener, _)| *listener == id)
            .map(|(_, tx)| tx.clone())
    }

    /// Bump the sequence and collect everyone to notify
    fn changed(&mut self) -> (u32, Vec<Sender<NativeNotification>>) {
        self.sequence = self.sequence.wrapping_add(1).max(1);
        let targets = self.listeners.iter().map(|(_, tx)| tx.clone()).collect();
        (self.sequence, targets)
    }

    fn require_open(&self) -> Result<ListenerId> {
        self.open_by
            .ok_or_else(|| ClipboardError::InvalidState("clipboard is not open".into()))
    }
}

/// In-process clipboard
pub struct MemoryClipboard {
    state: Mutex<State>,
    rendered: Condvar,
    render_wait: Duration,
}

impl Default for MemoryClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryClipboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryClipboard")
            .field("open_by", &state.open_by)
            .field("owner", &state.owner)
            .field("sequence", &state.sequence)
            .field("formats", &state.entries.len())
            .finish()
    }
}

impl MemoryClipboard {
    /// Empty clipboard
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            rendered: Condvar::new(),
            render_wait: DEFAULT_RENDER_WAIT,
        }
    }

    /// Override how long readers wait on delayed-render owners
    pub fn with_render_wait(mut self, wait: Duration) -> Self {
        self.render_wait = wait;
        self
    }

    /// Replace the clipboard with fully rendered content, as a local application would
    pub fn copy(&self, app: ListenerId, items: Vec<(u32, Bytes)>) -> Result<()> {
        self.open(app)?;
        let result = self.empty().and_then(|_| {
            items
                .into_iter()
                .try_for_each(|(id, data)| self.set_data(id, Some(data)))
        });
        self.close()?;
        result
    }

    /// Copy a set of file paths as `CF_HDROP`
    pub fn copy_files(&self, app: ListenerId, paths: Vec<String>) -> Result<()> {
        let drop_list = FileDropList::new(paths)?;
        self.copy(app, vec![(CF_HDROP, drop_list.encode())])
    }

    /// Read a format the way a pasting application does
    ///
    /// Delayed-render entries are requested from the owner and waited for;
    /// data objects are queried directly.
    pub fn paste(&self, format_id: u32) -> Option<Bytes> {
        self.read(format_id)
    }

    /// Keep the clipboard open as another process that does not let go
    pub fn hold_open(&self, app: ListenerId) -> Result<()> {
        self.open(app)
    }

    /// Release a clipboard held with [`MemoryClipboard::hold_open`]
    pub fn release(&self, app: ListenerId) -> Result<()> {
        if self.state.lock().open_by != Some(app) {
            return Err(ClipboardError::InvalidState(format!("{} does not hold the clipboard", app)));
        }
        self.close()
    }

    /// Make a file visible to [`NativeClipboard::file_metadata`]
    pub fn add_file(&self, path: impl Into<String>, metadata: FileMetadata) {
        self.state.lock().files.insert(path.into(), metadata);
    }

    /// Current change sequence number
    pub fn sequence(&self) -> u32 {
        self.state.lock().sequence
    }

    /// Formats currently on offer, in enumeration order
    pub fn available_formats(&self) -> Vec<u32> {
        let data_object = self.state.lock().data_object.clone();
        match data_object {
            Some(object) => object.formats().iter().map(|f| f.id()).collect(),
            None => self.state.lock().entries.iter().map(|(id, _)| *id).collect(),
        }
    }

    /// Ask the owner to settle all delayed formats, as on owner shutdown
    pub fn request_render_all(&self) -> bool {
        let state = self.state.lock();
        let Some(tx) = state.owner.and_then(|owner| state.listener_for(owner)) else {
            return false;
        };
        drop(state);
        tx.send(NativeNotification::RenderAllFormats).is_ok()
    }

    fn read(&self, format_id: u32) -> Option<Bytes> {
        let mut state = self.state.lock();

        if let Some(object) = state.data_object.clone() {
            drop(state);
            return object.get_data(format_id);
        }

        if let Some(data) = state.entry(format_id)? {
            return Some(data.clone());
        }

        // Delayed render: ask the owner and wait for the fill
        let owner_tx = state.owner.and_then(|owner| state.listener_for(owner));
        let Some(tx) = owner_tx else {
            debug!(format_id, "Delayed format has no live owner");
            return None;
        };
        let sequence = state.sequence;
        if tx.send(NativeNotification::RenderFormat { format_id }).is_err() {
            return None;
        }

        let deadline = Instant::now() + self.render_wait;
        loop {
            if state.sequence != sequence {
                return None;
            }
            match state.entry(format_id) {
                Some(Some(data)) => return Some(data.clone()),
                Some(None) => {}
                None => return None,
            }
            if self.rendered.wait_until(&mut state, deadline).timed_out() {
                warn!(format_id, "Clipboard owner did not render in time");
                return None;
            }
        }
    }

    fn notify(sequence: u32, targets: Vec<Sender<NativeNotification>>) {
        for tx in targets {
            // A listener that went away is simply skipped
            let _ = tx.send(NativeNotification::ClipboardUpdate { sequence });
        }
    }
}

impl NativeClipboard for MemoryClipboard {
    fn open(&self, owner: ListenerId) -> Result<()> {
        let mut state = self.state.lock();
        match state.open_by {
            Some(current) if current != owner => Err(ClipboardError::ResourceBusy { attempts: 1 }),
            _ => {
                state.open_by = Some(owner);
                Ok(())
            }
        }
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.require_open()?;
        state.open_by = None;

        if !state.dirty {
            return Ok(());
        }
        state.dirty = false;
        let (sequence, targets) = state.changed();
        drop(state);

        trace!(sequence, "Clipboard content changed");
        Self::notify(sequence, targets);
        Ok(())
    }

    fn empty(&self) -> Result<()> {
        let mut state = self.state.lock();
        let opener = state.require_open()?;
        state.entries.clear();
        state.data_object = None;
        state.owner = Some(opener);
        state.dirty = true;
        drop(state);

        // Wake readers stuck on placeholders that no longer exist
        self.rendered.notify_all();
        Ok(())
    }

    fn next_format(&self, after: u32) -> u32 {
        let ids = self.available_formats();
        let position = if after == 0 {
            Some(0)
        } else {
            ids.iter().position(|id| *id == after).map(|p| p + 1)
        };
        position.and_then(|p| ids.get(p).copied()).unwrap_or(0)
    }

    fn is_format_available(&self, format_id: u32) -> bool {
        self.available_formats().contains(&format_id)
    }

    fn format_name(&self, format_id: u32) -> Option<String> {
        let index = format_id.checked_sub(CF_REGISTERED_START)? as usize;
        self.state.lock().registered.get(index).cloned()
    }

    fn register_format(&self, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(ClipboardError::InvalidData("format name must not be empty".into()));
        }
        let mut state = self.state.lock();
        let index = match state.registered.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                state.registered.push(name.to_string());
                state.registered.len() - 1
            }
        };
        Ok(CF_REGISTERED_START + index as u32)
    }

    fn get_data(&self, format_id: u32) -> Option<Bytes> {
        self.read(format_id)
    }

    fn set_data(&self, format_id: u32, data: Option<Bytes>) -> Result<()> {
        let mut state = self.state.lock();

        if state.open_by.is_none() {
            // Filling a delayed-render placeholder does not need the clipboard open
            let filled = match data {
                Some(data) => match state
                    .entries
                    .iter_mut()
                    .find(|(id, existing)| *id == format_id && existing.is_none())
                {
                    Some((_, slot)) => {
                        *slot = Some(data);
                        true
                    }
                    None => false,
                },
                None => false,
            };
            drop(state);

            if !filled {
                return Err(ClipboardError::InvalidState("clipboard is not open".into()));
            }
            self.rendered.notify_all();
            return Ok(());
        }

        match state.entries.iter_mut().find(|(id, _)| *id == format_id) {
            Some((_, slot)) => *slot = data,
            None => state.entries.push((format_id, data)),
        }
        state.dirty = true;
        drop(state);
        self.rendered.notify_all();
        Ok(())
    }

    fn owner(&self) -> Option<ListenerId> {
        self.state.lock().owner
    }

    fn set_data_object(&self, object: Arc<dyn DataObject>) -> Result<()> {
        let mut state = self.state.lock();
        if state.open_by.is_some() {
            return Err(ClipboardError::ResourceBusy { attempts: 1 });
        }
        state.entries.clear();
        state.owner = None;
        state.data_object = Some(object);
        let (sequence, targets) = state.changed();
        drop(state);

        self.rendered.notify_all();
        Self::notify(sequence, targets);
        Ok(())
    }

    fn is_current_data_object(&self, object_id: u64) -> bool {
        self.state
            .lock()
            .data_object
            .as_ref()
            .is_some_and(|object| object.object_id() == object_id)
    }

    fn add_listener(&self, listener: ListenerId, notify: Sender<NativeNotification>) -> Result<()> {
        let mut state = self.state.lock();
        if state.listeners.iter().any(|(id, _)| *id == listener) {
            return Err(ClipboardError::InvalidState(format!("{} already registered", listener)));
        }
        state.listeners.push((listener, notify));
        Ok(())
    }

    fn remove_listener(&self, listener: ListenerId) {
        self.state.lock().listeners.retain(|(id, _)| *id != listener);
    }

    fn file_metadata(&self, path: &str) -> Option<FileMetadata> {
        self.state.lock().files.get(path).copied()
    }
}
