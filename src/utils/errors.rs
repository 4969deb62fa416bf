//! User-Friendly Error Formatting
//!
//! Turns CLI failures into readable messages with troubleshooting hints.

use crate::clipboard::ClipboardError;
use std::fmt::Write;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Format error for user consumption
///
/// Picks a hint section from the error chain (clipboard failures are matched
/// by type, everything else by message) and appends the technical details.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(output).ok();
    writeln!(output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(output, "║                     ERROR                                  ║").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(output).ok();

    let clipboard_error = error.chain().find_map(|cause| cause.downcast_ref::<ClipboardError>());
    let error_msg = error.to_string();

    match clipboard_error {
        Some(ClipboardError::ResourceBusy { attempts }) => format_busy_error(&mut output, *attempts),
        Some(ClipboardError::Timeout { format_id, timeout_ms }) => {
            format_timeout_error(&mut output, *format_id, *timeout_ms)
        }
        Some(ClipboardError::ChannelClosed) => format_channel_error(&mut output),
        _ if error_msg.contains("config") => format_config_error(&mut output),
        _ => format_generic_error(&mut output, &error_msg),
    }

    writeln!(output).ok();
    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Technical Details:").ok();
    writeln!(output).ok();
    writeln!(output, "{:#}", error).ok();
    writeln!(output).ok();

    writeln!(output, "{}", RULE).ok();
    writeln!(output, "Need Help?").ok();
    writeln!(output, "  - Run with --verbose for detailed logs: cliprdr-bridge -vv").ok();
    writeln!(output, "  - Use --log-format json for machine-readable logs").ok();
    writeln!(output, "╚════════════════════════════════════════════════════════════╝").ok();

    output
}

fn format_busy_error(output: &mut String, attempts: u32) {
    writeln!(output, "Clipboard Busy").ok();
    writeln!(output).ok();
    writeln!(output, "Another program kept the clipboard open for {} attempts.", attempts).ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. A clipboard manager or viewer is holding the clipboard").ok();
    writeln!(output, "     → Close clipboard history tools and retry").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Retry limit too low for a slow system").ok();
    writeln!(output, "     → Raise clipboard.open_retry_attempts in config.toml").ok();
}

fn format_timeout_error(output: &mut String, format_id: u32, timeout_ms: u64) {
    writeln!(output, "Clipboard Render Timeout").ok();
    writeln!(output).ok();
    writeln!(
        output,
        "The remote side did not deliver format {} within {}ms.",
        format_id, timeout_ms
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Large clipboard content over a slow link").ok();
    writeln!(output, "     → Raise clipboard.render_timeout_ms in config.toml").ok();
    writeln!(output).ok();
    writeln!(output, "  2. The remote clipboard owner stopped responding").ok();
    writeln!(output, "     → Copy the content again on the remote side").ok();
}

fn format_channel_error(output: &mut String) {
    writeln!(output, "Clipboard Channel Closed").ok();
    writeln!(output).ok();
    writeln!(output, "The clipboard virtual channel went away mid-operation.").ok();
    writeln!(output, "Clipboard bridging stays off until the session reconnects.").ok();
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with configuration file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Configuration file not found").ok();
    writeln!(output, "     → Specify it with: cliprdr-bridge --config /path/to/config.toml").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Out-of-range values").ok();
    writeln!(output, "     → Timeouts, retry attempts and max_data_size must be non-zero").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Clipboard Bridge Error").ok();
    writeln!(output).ok();
    writeln!(output, "An error occurred while running the clipboard bridge.").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_format_user_error() {
        let error = anyhow::anyhow!("Failed to parse config file");
        let formatted = format_user_error(&error);
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("Configuration Error"));
    }

    #[test]
    fn test_clipboard_error_is_matched_through_context() {
        let result: std::result::Result<(), ClipboardError> = Err(ClipboardError::Timeout {
            format_id: 13,
            timeout_ms: 3000,
        });
        let error = result.context("Paste failed").unwrap_err();

        let formatted = format_user_error(&error);
        assert!(formatted.contains("Clipboard Render Timeout"));
        assert!(formatted.contains("render_timeout_ms"));
    }

    #[test]
    fn test_generic_error_formatting() {
        let formatted = format_user_error(&anyhow::anyhow!("something odd"));
        assert!(formatted.contains("Clipboard Bridge Error"));
        assert!(formatted.contains("something odd"));
    }
}
