//! Utility Functions
//!
//! User-friendly error formatting for the command line.
//!
//! ```rust,no_run
//! use cliprdr_bridge::utils::format_user_error;
//!
//! let error = anyhow::anyhow!("Failed to read config file: /etc/cliprdr.toml");
//! eprintln!("{}", format_user_error(&error));
//! ```
//!
//! Clipboard failures found anywhere in the error chain get a dedicated
//! section (busy clipboard, render timeout, closed channel); other errors are
//! matched by message.

pub mod errors;

pub use errors::format_user_error;
