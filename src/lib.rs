//! # cliprdr-bridge
//!
//! RDP clipboard redirection core: bridges a local OS clipboard with the
//! clipboard of a remote desktop session over the CLIPRDR virtual channel.
//!
//! # Architecture
//!
//! ```text
//! cliprdr-bridge
//!   ├─> Clipboard Monitor (native listener, event loop)
//!   │     ├─> Ownership Tracker (echo suppression)
//!   │     └─> Format Catalog (local format lists)
//!   ├─> Render Broker (delayed rendering over the channel)
//!   ├─> Data Object Bridge (lazy mirror of remote content)
//!   └─> Transport glue (PDU sink, inbound pump)
//! ```
//!
//! # Data Flow
//!
//! **Local → Remote:** App copy → ClipboardUpdate → Format List PDU → remote
//! Data Request → local render → Data Response
//!
//! **Remote → Local:** Format List PDU → mirror installed → App paste →
//! Render Broker → Data Request → Data Response → SetClipboardData

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Clipboard redirection core
pub mod clipboard;

/// Bridge configuration
pub mod config;

/// Utility functions
pub mod utils;
