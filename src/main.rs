//! cliprdr-bridge - clipboard redirection loopback
//!
//! Entry point for the bridge binary. Wires two clipboard sessions, each over
//! its own in-memory clipboard, back to back through channel transports and
//! round-trips a piece of text through delayed rendering.

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cliprdr_bridge::clipboard::formats::format_id::CF_UNICODETEXT;
use cliprdr_bridge::clipboard::{
    channel_pair, spawn_inbound_pump, ClipboardLock, ClipboardMonitor, ClipboardSession, ListenerId,
    MemoryClipboard, NativeClipboard, SessionConfig,
};
use cliprdr_bridge::config::{Config, LoggingConfig};
use cliprdr_bridge::utils::format_user_error;

/// Command-line arguments for cliprdr-bridge
#[derive(Parser, Debug)]
#[command(name = "cliprdr-bridge")]
#[command(version, about = "RDP clipboard redirection loopback", long_about = None)]
pub struct Args {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long, env = "CLIPRDR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Text copied on the remote side and pasted locally
    #[arg(short, long, default_value = "Hello from the remote clipboard")]
    pub text: String,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match Config::load_or_default(args.config.as_deref()) {
        Ok(config) => config.with_overrides(args.log_format.clone(), args.verbose),
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return Err(e);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    let _log_guard = init_logging(&config.logging, args.log_file.as_ref())?;

    info!("════════════════════════════════════════════════════════");
    info!("  cliprdr-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");
    tracing::debug!("Config: {:?}", config);

    if !config.clipboard.enabled {
        info!("Clipboard redirection disabled in configuration, nothing to do");
        return Ok(());
    }

    if let Err(e) = run_loopback(&config, &args.text).await {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    info!("Loopback completed");
    Ok(())
}

async fn run_loopback(config: &Config, text: &str) -> Result<()> {
    let session_config = SessionConfig::from(&config.clipboard);
    let retry = config.clipboard.retry_config();
    let settle = config.clipboard.render_timeout() * 2;

    let local = Arc::new(MemoryClipboard::new());
    let remote = Arc::new(MemoryClipboard::new());

    let (local_sink, to_remote) = channel_pair();
    let (remote_sink, to_local) = channel_pair();

    let local_session = ClipboardSession::new(
        "local",
        local.clone(),
        ClipboardLock::shared(retry.clone()),
        local_sink.clone(),
        session_config.clone(),
    );
    let remote_session = ClipboardSession::new(
        "remote",
        remote.clone(),
        ClipboardLock::shared(retry),
        remote_sink.clone(),
        session_config,
    );

    let local_pump = spawn_inbound_pump(local_session.clone(), to_local);
    let remote_pump = spawn_inbound_pump(remote_session.clone(), to_remote);

    let mut local_monitor = ClipboardMonitor::new(local_session);
    let mut remote_monitor = ClipboardMonitor::new(remote_session);
    local_monitor.start().context("Failed to start local clipboard monitor")?;
    remote_monitor.start().context("Failed to start remote clipboard monitor")?;

    info!(text, "Copying text on the remote side");
    remote
        .copy(ListenerId::next(), vec![(CF_UNICODETEXT, unicode_text(text))])
        .context("Remote copy failed")?;

    let deadline = Instant::now() + settle;
    while !local.is_format_available(CF_UNICODETEXT) {
        if Instant::now() >= deadline {
            anyhow::bail!("Remote format list never reached the local clipboard");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reader = Arc::clone(&local);
    let pasted = tokio::task::spawn_blocking(move || reader.paste(CF_UNICODETEXT))
        .await?
        .context("Local paste returned no data")?;
    let pasted = decode_unicode_text(&pasted)?;
    info!(pasted = %pasted, "Pasted text on the local side");

    tokio::task::spawn_blocking(move || {
        local_monitor.stop();
        remote_monitor.stop();
    })
    .await?;
    local_sink.close();
    remote_sink.close();
    local_pump.await?;
    remote_pump.await?;

    if pasted != text {
        anyhow::bail!("Round trip mismatch: copied {:?}, pasted {:?}", text, pasted);
    }
    Ok(())
}

/// `CF_UNICODETEXT` payload: UTF-16LE with a terminating null
fn unicode_text(text: &str) -> Bytes {
    let mut buf = BytesMut::new();
    for unit in text.encode_utf16() {
        buf.put_u16_le(unit);
    }
    buf.put_u16_le(0);
    buf.freeze()
}

fn decode_unicode_text(data: &[u8]) -> Result<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16(&units).context("Pasted text is not valid UTF-16")
}

fn init_logging(
    config: &LoggingConfig,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("cliprdr_bridge={level},warn", level = config.level))
    });

    // An explicit --log-file wins over the configured rolling directory
    let (writer, guard) = match (log_file, &config.log_dir) {
        (Some(path), _) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        (None, Some(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, "cliprdr-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        (None, None) => (None, None),
    };
    let file_layer = writer.map(|w| tracing_subscriber::fmt::layer().with_writer(w).with_ansi(false));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer.map(|layer| layer.json()))
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    if let Some(path) = log_file {
        info!("Logging to file: {}", path.display());
    }
    Ok(guard)
}
