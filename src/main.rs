use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use multimodal_live::{ClientConfig, ContentPart, LiveClient};

/// How long to wait for the close handshake after disconnecting.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Multimodal live session client - chat with a live assistant from the terminal
#[derive(Parser, Debug)]
#[command(name = "multimodal-live")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// WebSocket endpoint, overrides configuration
    #[arg(short = 'u', long = "url", value_name = "URL")]
    url: Option<String>,

    /// User identifier sent in the handshake
    #[arg(long = "user-id", value_name = "ID")]
    user_id: Option<String>,

    /// Run identifier sent in the handshake
    #[arg(long = "run-id", value_name = "ID")]
    run_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Needed before any wss:// connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path).map_err(|e| anyhow!("{}", e))?
        }
        None => ClientConfig::from_env().map_err(|e| anyhow!("{}", e))?,
    };
    if let Some(url) = cli.url {
        config.endpoint = url;
    }
    if cli.user_id.is_some() {
        config.user_id = cli.user_id;
    }
    if cli.run_id.is_some() {
        config.run_id = cli.run_id;
    }

    let identity = config.to_identity()?;
    info!("Run id: {}", identity.run_id);

    let client = LiveClient::new(identity);
    let closed = Arc::new(Notify::new());
    register_printers(&client, Arc::clone(&closed));

    client.connect(None).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = client.send_text(text) {
                    warn!("Failed to send turn: {}", e);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = closed.notified() => {
                return Ok(());
            }
        }
    }

    if client.disconnect(None) {
        let _ = tokio::time::timeout(CLOSE_GRACE, closed.notified()).await;
    }

    Ok(())
}

/// Print everything the session emits.
fn register_printers(client: &LiveClient, closed: Arc<Notify>) {
    let events = client.events();

    events.on_setup_complete(|| info!("Setup complete"));
    events.on_turn_complete(|| println!());
    events.on_interrupted(|| info!("Interrupted by server"));
    events.on_markdown(|text| println!("{text}"));
    events.on_content(|parts| {
        if let Err(e) = write_content(&mut std::io::stdout().lock(), parts) {
            warn!("Failed to print content: {}", e);
        }
    });
    events.on_audio(|pcm| tracing::debug!("Received {} bytes of audio", pcm.len()));
    events.on_image(|image| {
        println!("[image] {} {}", image.url, image.alt.as_deref().unwrap_or(""));
    });
    events.on_ui_feedback(|feedback| info!("[{}] {}", feedback.status, feedback.message));
    events.on_tool_call(|call| {
        for function_call in &call.function_calls {
            info!("Tool call {}({})", function_call.name, function_call.args);
        }
    });
    events.on_tool_call_cancellation(|cancellation| {
        info!("Tool calls cancelled: {:?}", cancellation.ids);
    });
    events.on_close(move |close| {
        match &close.error_detail {
            Some(detail) => warn!("Session closed: {}", detail),
            None => info!("Session closed"),
        }
        closed.notify_one();
    });
}

/// Write the text parts of a model turn. Flushed so streamed text shows
/// before the turn's closing newline.
fn write_content(out: &mut impl Write, parts: &[ContentPart]) -> std::io::Result<()> {
    for text in parts.iter().filter_map(ContentPart::as_text) {
        write!(out, "{text}")?;
    }
    out.flush()
}
