//! Clipboard Redirection Core
//!
//! Bridges a local OS clipboard with the clipboard of a remote desktop
//! session over the CLIPRDR virtual channel: format advertisement, echo
//! suppression, and delayed rendering of remote data.
//!
//! # Architecture
//!
//! - [`formats`] - Format Catalog (build and parse format lists)
//! - [`ownership`] - Ownership Tracker (echo suppression, clipboard role)
//! - [`render`] - Render Broker (single in-flight remote fetch per session)
//! - [`mirror`] - Data Object Bridge (lazy local mirror of remote content)
//! - [`monitor`] - Clipboard Monitor (listener lifecycle, event dispatch)
//! - [`session`] - Per-session state and inbound PDU dispatch
//! - [`native`] - Abstract OS clipboard and the process-wide clipboard lock
//!
//! # Data Flow
//!
//! ```text
//! Local app            Native clipboard        Monitor thread          Channel
//! ━━━━━━━━━            ━━━━━━━━━━━━━━━━        ━━━━━━━━━━━━━━          ━━━━━━━
//!
//! Copy ──────────────> ClipboardUpdate ──────> OwnershipTracker
//!                                               └─> FormatCatalog ───> Format List
//!
//!                      InstallMirror <──────── ClipboardSession <───── Format List
//!
//! Paste ─────────────> RenderFormat ─────────> RenderBroker ─────────> Data Request
//!   <───────────────── SetClipboardData <───── (mailbox) <──────────── Data Response
//! ```
//!
//! The clipboard lock is never held while a render waits on the network.

pub mod error;
pub mod file_list;
pub mod formats;
pub mod memory;
pub mod mirror;
pub mod monitor;
pub mod native;
pub mod ownership;
pub mod pdu;
pub mod render;
pub mod session;
pub mod transport;

pub use error::{ClipboardError, ErrorType, RecoveryAction, Result, RetryConfig};
pub use file_list::{FileDescriptor, FileDropList, FileKind, FileMetadata, FileTime};
pub use formats::{build_local_format_list, parse_remote_format_list, serialize_format_list};
pub use formats::{FormatDescriptor, FormatList};
pub use memory::MemoryClipboard;
pub use mirror::{install_mirror, DataObjectHandle, MirrorKind, MirrorObject};
pub use monitor::{ClipboardMonitor, MonitorEvent};
pub use native::{ClipboardLock, DataObject, ListenerId, NativeClipboard, NativeNotification, OpenClipboard};
pub use ownership::{ClipboardRole, OwnershipTracker};
pub use pdu::{ClipboardPdu, FormatDataResponse};
pub use render::{PendingRenderRequest, RenderBroker};
pub use session::{ClipboardSession, SessionConfig};
pub use transport::{channel_pair, spawn_inbound_pump, ChannelSink, PduSink};
