//! Native Clipboard Contract
//!
//! The narrow interface the core uses to talk to the operating system's
//! clipboard, and the process-wide lock every native call goes through.
//!
//! The native API is a single, non-reentrant, globally shared resource: only
//! one thread may hold it open at a time, and another process may hold it
//! open for an arbitrary time. [`ClipboardLock`] serializes access within the
//! process and retries contended opens with bounded backoff; [`OpenClipboard`]
//! closes the clipboard and releases the lock on every exit path.

use crate::clipboard::error::{ClipboardError, Result, RetryConfig};
use crate::clipboard::file_list::FileMetadata;
use crate::clipboard::formats::FormatDescriptor;
use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity of a clipboard listener window (and clipboard owner)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Allocate a process-unique listener id
    pub fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Notifications the OS delivers to a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeNotification {
    /// Clipboard content changed; `sequence` is the change indicator (0 = none)
    ClipboardUpdate {
        /// Change sequence number
        sequence: u32,
    },
    /// The listener owns a delayed-render format a reader now needs
    RenderFormat {
        /// Format to render
        format_id: u32,
    },
    /// The listener is about to lose ownership and must settle its formats
    RenderAllFormats,
}

/// A lazily-fulfilled clipboard object
///
/// Readers query formats and data through the object instead of through
/// stored clipboard entries.
pub trait DataObject: Send + Sync + fmt::Debug {
    /// Stable identity used for "is current clipboard" checks
    fn object_id(&self) -> u64;

    /// Formats the object can produce, in local ids
    fn formats(&self) -> Vec<FormatDescriptor>;

    /// Produce the bytes for one format, `None` if it cannot
    fn get_data(&self, format_id: u32) -> Option<Bytes>;
}

/// Abstract OS clipboard
///
/// Calls that the OS only permits while the clipboard is open (`empty`,
/// enumeration, `get_data`, `set_data` of new content) must be made through an
/// [`OpenClipboard`] guard. Filling a delayed-render format in response to
/// [`NativeNotification::RenderFormat`] only needs [`ClipboardLock::acquire`].
pub trait NativeClipboard: Send + Sync {
    /// Open the clipboard on behalf of `owner`; [`ClipboardError::ResourceBusy`] if held elsewhere
    fn open(&self, owner: ListenerId) -> Result<()>;

    /// Close the clipboard
    fn close(&self) -> Result<()>;

    /// Clear all content; the opener becomes the owner
    fn empty(&self) -> Result<()>;

    /// Format following `after` in enumeration order (`0` starts, `0` ends)
    fn next_format(&self, after: u32) -> u32;

    /// Whether a format is currently offered
    fn is_format_available(&self, format_id: u32) -> bool;

    /// Registered name of a format; `None` for predefined formats
    fn format_name(&self, format_id: u32) -> Option<String>;

    /// Register (or look up) a format by name
    fn register_format(&self, name: &str) -> Result<u32>;

    /// Read the bytes of a format
    fn get_data(&self, format_id: u32) -> Option<Bytes>;

    /// Store a format; `None` offers it with delayed rendering
    fn set_data(&self, format_id: u32, data: Option<Bytes>) -> Result<()>;

    /// Current clipboard owner
    fn owner(&self) -> Option<ListenerId>;

    /// Replace the clipboard content with a lazily-fulfilled object
    fn set_data_object(&self, object: Arc<dyn DataObject>) -> Result<()>;

    /// Whether the object with this id is still the active clipboard content
    fn is_current_data_object(&self, object_id: u64) -> bool;

    /// Subscribe to clipboard notifications
    fn add_listener(&self, listener: ListenerId, notify: Sender<NativeNotification>) -> Result<()>;

    /// Unsubscribe; a no-op when the listener is not registered
    fn remove_listener(&self, listener: ListenerId);

    /// Stat a file referenced by a drop list
    fn file_metadata(&self, path: &str) -> Option<FileMetadata>;
}

/// Process-wide mutual exclusion around native clipboard calls
///
/// Created once and handed to every session; never held across a network wait.
#[derive(Debug)]
pub struct ClipboardLock {
    mutex: Mutex<()>,
    retry: RetryConfig,
}

impl ClipboardLock {
    /// Create a lock with the given open retry policy
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            mutex: Mutex::new(()),
            retry,
        }
    }

    /// Create a shareable lock
    pub fn shared(retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self::new(retry))
    }

    /// Retry policy for contended opens
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Hold the lock for a short call that does not need the clipboard open
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }

    /// Open the clipboard, retrying with backoff while another process holds it
    ///
    /// The lock is released between attempts so other threads are not stalled
    /// behind a foreign process.
    pub fn open<'a>(&'a self, native: &'a dyn NativeClipboard, owner: ListenerId) -> Result<OpenClipboard<'a>> {
        self.with_retry(|| {
            let guard = self.mutex.lock();
            native.open(owner)?;
            Ok(OpenClipboard {
                native,
                _guard: guard,
            })
        })
    }

    /// Run `op` under the lock, retrying [`ClipboardError::ResourceBusy`]
    pub fn locked<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        self.with_retry(|| {
            let _guard = self.mutex.lock();
            op()
        })
    }

    fn with_retry<T>(&self, mut attempt_op: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 0..attempts {
            match attempt_op() {
                Err(ClipboardError::ResourceBusy { .. }) => {
                    if attempt + 1 < attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(attempt, ?delay, "Native clipboard busy, retrying");
                        std::thread::sleep(delay);
                    }
                }
                other => return other,
            }
        }

        warn!(attempts, "Native clipboard still busy, giving up");
        Err(ClipboardError::ResourceBusy { attempts })
    }
}

/// An open clipboard; closes and unlocks on drop
pub struct OpenClipboard<'a> {
    native: &'a dyn NativeClipboard,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Deref for OpenClipboard<'a> {
    type Target = dyn NativeClipboard + 'a;

    fn deref(&self) -> &Self::Target {
        self.native
    }
}

impl Drop for OpenClipboard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.native.close() {
            warn!("CloseClipboard failed: {}", e);
        }
    }
}
