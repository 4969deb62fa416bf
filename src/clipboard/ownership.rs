//! Ownership Tracker
//!
//! Decides whether a local clipboard change is genuine (another local
//! application wrote the clipboard) or an echo of content this session put
//! there itself. Only genuine changes are advertised to the remote side;
//! advertising an echo would loop notify -> advertise -> notify between two
//! bridged endpoints.
//!
//! The tracker also keeps the session's clipboard role:
//!
//! ```text
//! Idle ──local change──▶ LocalOwner ──ownership lost──▶ Idle
//!  │                         ▲
//!  └──remote list──▶ RemoteMirrored ──local overwrite──▶ Idle
//! ```

use crate::clipboard::native::{ListenerId, NativeClipboard};
use tracing::{debug, info};

/// What the session's local clipboard currently represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardRole {
    /// Nothing bridged
    Idle,
    /// A local application owns the clipboard and its formats were advertised
    LocalOwner,
    /// The clipboard holds this session's mirror of remote content
    RemoteMirrored,
}

/// Per-session ownership bookkeeping
#[derive(Debug)]
pub struct OwnershipTracker {
    listener: ListenerId,
    role: ClipboardRole,
    /// Object id of the installed data object mirror, if any
    mirror_object: Option<u64>,
}

impl OwnershipTracker {
    /// Tracker for the session whose native listener is `listener`
    pub fn new(listener: ListenerId) -> Self {
        Self {
            listener,
            role: ClipboardRole::Idle,
            mirror_object: None,
        }
    }

    /// Current role
    pub fn role(&self) -> ClipboardRole {
        self.role
    }

    /// The clipboard is owned by this session's own listener window
    pub fn is_self_owned(&self, native: &dyn NativeClipboard) -> bool {
        native.owner() == Some(self.listener)
    }

    /// The clipboard still holds this session's data object mirror
    pub fn is_remote_mirrored(&self, native: &dyn NativeClipboard) -> bool {
        self.mirror_object
            .is_some_and(|object_id| native.is_current_data_object(object_id))
    }

    /// Whether a change notification carrying `sequence` must be advertised
    pub fn should_advertise(&self, native: &dyn NativeClipboard, sequence: u32) -> bool {
        if sequence == 0 {
            debug!("Ignoring clipboard update without change indicator");
            return false;
        }
        if self.is_self_owned(native) {
            debug!(sequence, "Ignoring clipboard update from own listener");
            return false;
        }
        if self.is_remote_mirrored(native) {
            debug!(sequence, "Ignoring clipboard update, mirror still current");
            return false;
        }
        true
    }

    /// A genuine local change was advertised with `format_count` formats
    pub fn local_change(&mut self, format_count: usize) {
        if self.role != ClipboardRole::Idle {
            debug!(from = ?self.role, "Clipboard ownership lost to a local application");
            self.transition(ClipboardRole::Idle);
        }
        self.mirror_object = None;

        if format_count > 0 {
            self.transition(ClipboardRole::LocalOwner);
        }
    }

    /// A mirror of remote content was installed
    pub fn mirror_installed(&mut self, object_id: Option<u64>) {
        self.mirror_object = object_id;
        self.transition(ClipboardRole::RemoteMirrored);
    }

    /// Forget everything, e.g. after rendering all formats or on teardown
    pub fn reset(&mut self) {
        self.mirror_object = None;
        self.transition(ClipboardRole::Idle);
    }

    fn transition(&mut self, to: ClipboardRole) {
        if self.role != to {
            info!(listener = %self.listener, from = ?self.role, ?to, "Clipboard role changed");
            self.role = to;
        }
    }
}
