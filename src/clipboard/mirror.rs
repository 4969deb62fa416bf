//! Data Object Bridge
//!
//! When the remote side owns the clipboard, a mirror of its format list is
//! installed locally. Bytes are only fetched through the [`RenderBroker`] when
//! a local reader asks for a format.
//!
//! File lists are installed as a lazily-fulfilled data object (composite
//! transfer); everything else as delayed-render placeholders that the OS
//! satisfies through "render format" notifications.

use crate::clipboard::error::{ClipboardError, Result};
use crate::clipboard::formats::{FormatDescriptor, FormatList};
use crate::clipboard::native::DataObject;
use crate::clipboard::render::RenderBroker;
use crate::clipboard::session::ClipboardSession;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// How a mirror is exposed to local readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorKind {
    /// Lazily-fulfilled data object
    DataObject,
    /// Delayed-render placeholders owned by the session's listener
    DelayedRender,
}

/// Local stand-in for remote clipboard content
pub struct MirrorObject {
    object_id: u64,
    generation: u64,
    kind: MirrorKind,
    /// Local descriptor and the remote id it is fetched under
    formats: Vec<(FormatDescriptor, u32)>,
    broker: Weak<RenderBroker>,
    cache: Mutex<HashMap<u32, Bytes>>,
}

/// Shared handle to an installed mirror
pub type DataObjectHandle = Arc<MirrorObject>;

impl std::fmt::Debug for MirrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorObject")
            .field("object_id", &self.object_id)
            .field("generation", &self.generation)
            .field("kind", &self.kind)
            .field("formats", &self.formats.len())
            .finish()
    }
}

impl MirrorObject {
    /// Identity used for "is current clipboard" checks
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// Remote format list generation this mirror reflects
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Installation strategy
    pub fn kind(&self) -> MirrorKind {
        self.kind
    }

    /// Remote id a local format is fetched under
    pub fn remote_id(&self, local_id: u32) -> Option<u32> {
        self.formats
            .iter()
            .find(|(local, _)| local.id() == local_id)
            .map(|(_, remote)| *remote)
    }

    /// Fetch a format from the remote side, at most once per mirror
    ///
    /// The cache lock is held across the fetch so concurrent readers of the
    /// same mirror share one round trip.
    pub fn render(&self, local_id: u32) -> Result<Bytes> {
        let mut cache = self.cache.lock();
        if let Some(data) = cache.get(&local_id) {
            debug!(object = self.object_id, format_id = local_id, "Serving mirrored format from cache");
            return Ok(data.clone());
        }

        let remote_id = self
            .remote_id(local_id)
            .ok_or(ClipboardError::UnknownFormat(local_id))?;
        let broker = self.broker.upgrade().ok_or(ClipboardError::ChannelClosed)?;

        let data = broker.request_render(remote_id)?;
        cache.insert(local_id, data.clone());
        Ok(data)
    }
}

impl DataObject for MirrorObject {
    fn object_id(&self) -> u64 {
        self.object_id
    }

    fn formats(&self) -> Vec<FormatDescriptor> {
        self.formats.iter().map(|(local, _)| local.clone()).collect()
    }

    fn get_data(&self, format_id: u32) -> Option<Bytes> {
        match self.render(format_id) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(object = self.object_id, format_id, "Data object render failed: {}", e);
                None
            }
        }
    }
}

/// Install a local mirror of `remote` into the native clipboard
///
/// Returns the existing mirror untouched when it already reflects
/// `generation` and is still the active clipboard content.
pub fn install_mirror(session: &ClipboardSession, remote: &FormatList, generation: u64) -> Result<DataObjectHandle> {
    if let Some(current) = session.current_mirror() {
        if current.generation == generation && is_still_current(session, &current) {
            debug!(session = %session.id(), generation, "Mirror already current, skipping install");
            return Ok(current);
        }
    }

    let formats = map_formats(session, remote);
    if formats.is_empty() {
        return Err(ClipboardError::InvalidData("no remote format could be mapped".into()));
    }

    let kind = if remote.is_file_list() && session.config().enable_file_lists {
        MirrorKind::DataObject
    } else {
        MirrorKind::DelayedRender
    };
    let mirror = Arc::new(MirrorObject {
        object_id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
        generation,
        kind,
        formats,
        broker: Arc::downgrade(session.broker()),
        cache: Mutex::new(HashMap::new()),
    });

    match kind {
        MirrorKind::DataObject => {
            let object: Arc<dyn DataObject> = mirror.clone();
            session
                .lock()
                .locked(|| session.native().set_data_object(Arc::clone(&object)))?;
            session.set_mirror(Arc::clone(&mirror), Some(mirror.object_id));
        }
        MirrorKind::DelayedRender => {
            // Record the mirror first: the close below notifies our own listener
            session.set_mirror(Arc::clone(&mirror), None);
            let placed = place_placeholders(session, &mirror);
            if let Err(e) = placed {
                session.reset_role();
                return Err(e);
            }
        }
    }

    info!(
        session = %session.id(),
        object = mirror.object_id,
        generation,
        kind = ?kind,
        formats = mirror.formats.len(),
        "Installed remote clipboard mirror"
    );
    Ok(mirror)
}

fn place_placeholders(session: &ClipboardSession, mirror: &MirrorObject) -> Result<()> {
    let clipboard = session.lock().open(session.native(), session.listener())?;
    clipboard.empty()?;
    for (local, _) in &mirror.formats {
        clipboard.set_data(local.id(), None)?;
    }
    Ok(())
}

fn is_still_current(session: &ClipboardSession, mirror: &MirrorObject) -> bool {
    let _guard = session.lock().acquire();
    match mirror.kind {
        MirrorKind::DataObject => session.native().is_current_data_object(mirror.object_id),
        MirrorKind::DelayedRender => session.native().owner() == Some(session.listener()),
    }
}

/// Pair each remote format with a local id; named formats are registered locally
fn map_formats(session: &ClipboardSession, remote: &FormatList) -> Vec<(FormatDescriptor, u32)> {
    remote
        .iter()
        .filter_map(|format| {
            if format.is_predefined() {
                return Some((format.clone(), format.id()));
            }
            match session.lock().locked(|| session.native().register_format(format.name())) {
                Ok(local_id) => Some((FormatDescriptor::new(local_id, format.name()), format.id())),
                Err(e) => {
                    warn!(format = format.name(), "Cannot register remote format locally: {}", e);
                    None
                }
            }
        })
        .collect()
}
