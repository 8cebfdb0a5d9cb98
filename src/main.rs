//! # Live News Assistant - Headless Runner
//!
//! Drives one live session without sound hardware:
//! - the microphone is a 16 kHz mono WAV file replayed at real time
//! - assistant speech is recorded to a WAV file
//! - transcripts and lifecycle events go to the log
//!
//! ## Usage:
//! ```text
//! live-news-assistant <input.wav> [output.wav] [--instruction <text>]
//! live-news-assistant --print-config
//! ```
//!
//! The session ends on Ctrl-C / SIGTERM, when the remote side closes it, or a
//! short grace period after the input file has been fully sent.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use live_news_assistant::audio::wav_device::WavFileDevice;
use live_news_assistant::channel::gemini::GeminiLiveChannel;
use live_news_assistant::session::LoggingObserver;
use live_news_assistant::tools::NewsSearch;
use live_news_assistant::{AppConfig, SessionDeps, SessionManager, SessionState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_INSTRUCTION: &str = "You are a friendly news assistant. Answer briefly and \
conversationally. When the user asks about current events, call search_news and summarize \
the results in a few sentences.";

/// Time allowed for the assistant to answer after the input file ends.
const REPLY_GRACE: Duration = Duration::from_secs(15);

/// Search backend for headless runs: there is none, so every call gets the fallback text.
struct UnavailableNewsSearch;

#[async_trait]
impl NewsSearch for UnavailableNewsSearch {
    async fn search(&self, topic: &str, _date: Option<&str>) -> Result<String> {
        bail!("no news backend configured for '{}'", topic)
    }
}

struct Args {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    instruction: String,
    print_config: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        input: None,
        output: None,
        instruction: DEFAULT_INSTRUCTION.to_string(),
        print_config: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--print-config" => args.print_config = true,
            "--instruction" => {
                args.instruction = iter.next().context("--instruction needs a value")?;
            }
            _ if args.input.is_none() => args.input = Some(PathBuf::from(arg)),
            _ if args.output.is_none() => args.output = Some(PathBuf::from(arg)),
            other => bail!("unexpected argument: {}", other),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();
    init_tracing()?;

    // tokio-tungstenite's rustls connector needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let args = parse_args()?;
    let config = AppConfig::load()?;
    config.validate()?;

    if args.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let Some(input) = args.input else {
        bail!("usage: live-news-assistant <input.wav> [output.wav] [--instruction <text>]");
    };
    if config.live.api_key.is_empty() {
        bail!("no API key: set GEMINI_API_KEY or API_KEY");
    }

    info!("Starting live-news-assistant v{}", env!("CARGO_PKG_VERSION"));
    info!(model = %config.live.model, voice = %config.live.voice, "Configuration loaded");

    let device = WavFileDevice::new(input, args.output);
    let input_finished = device.input_finished();

    let manager = SessionManager::new(
        config.clone(),
        SessionDeps {
            channel: Arc::new(GeminiLiveChannel::new(&config.live)),
            device: Arc::new(device),
            search: Arc::new(UnavailableNewsSearch),
            observer: Arc::new(LoggingObserver),
        },
    );

    if let Err(e) = manager.connect(&args.instruction).await {
        error!("Could not start session: {}", e);
        return Err(e.into());
    }

    tokio::select! {
        _ = wait_for_signal() => info!("Shutdown signal received"),
        _ = async {
            input_finished.cancelled().await;
            info!(grace_secs = REPLY_GRACE.as_secs(), "Input finished, waiting for the reply");
            tokio::time::sleep(REPLY_GRACE).await;
        } => {}
        _ = wait_for_session_end(&manager) => info!("Session ended by the remote side"),
    }

    manager.disconnect().await;
    if let Some(stats) = manager.capture_stats() {
        info!(
            forwarded = stats.frames_forwarded(),
            dropped = stats.frames_dropped(),
            "Capture summary"
        );
    }
    info!("Stopped");
    Ok(())
}

/// Set up structured logging from `RUST_LOG`, defaulting to debug for this crate.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_news_assistant=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Poll until the session is no longer live.
async fn wait_for_session_end(manager: &SessionManager) {
    while manager.state() != SessionState::Disconnected {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
