//! Cast command - negotiate a screencast and present it

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use portalcast_core::config::{CaptureConfig, ConfigFile, CursorMode, Preset, RenegotiationMode};
use portalcast_core::{run_capture, MemorySurface};
use tokio::signal::{self, unix::SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Arguments for the cast command
#[derive(Args)]
pub struct CastArgs {
    /// Preferred size (720p30, 720p60, 1080p30, 1080p60, 1440p60, 4k60 or WIDTHxHEIGHT@FPS)
    #[arg(short, long)]
    size: Option<String>,

    /// Renegotiate periodically while streaming (off, format, buffers)
    #[arg(short, long)]
    renegotiate: Option<String>,

    /// Renegotiation interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Cursor mode (hidden, embedded, metadata)
    #[arg(long)]
    cursor: Option<String>,

    /// Restore token from an earlier session
    #[arg(long)]
    restore_token: Option<String>,

    /// Skip the portal and read this node from the local PipeWire daemon
    #[arg(long, value_name = "NODE_ID")]
    no_portal: Option<u32>,

    /// Config file to use instead of the default one
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl CastArgs {
    /// Merge the flags over the file configuration
    fn into_config(self) -> Result<CaptureConfig> {
        let file = match &self.config {
            Some(path) => ConfigFile::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ConfigFile::load_or_default(),
        };
        let mut config = CaptureConfig::from_file(&file);

        if let Some(size) = &self.size {
            let preset: Preset = size.parse().map_err(|_| {
                anyhow::anyhow!(
                    "Invalid size '{}'. Valid options: 720p30, 720p60, 1080p30, 1080p60, 1440p60, 4k60 or WIDTHxHEIGHT@FPS",
                    size
                )
            })?;
            config = config.with_preset(preset);
        }
        if let Some(mode) = &self.renegotiate {
            let mode: RenegotiationMode = mode.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            config = config.with_renegotiation(mode);
        }
        if let Some(ms) = self.interval_ms {
            config = config.with_interval(Duration::from_millis(ms));
        }
        if let Some(cursor) = &self.cursor {
            let mode: CursorMode = cursor.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            config = config.with_cursor_mode(mode);
        }
        if let Some(token) = self.restore_token {
            config = config.with_restore_token(token);
        }
        if let Some(node_id) = self.no_portal {
            config = config.with_local_node(node_id);
        }

        config
            .validate_strict()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(config)
    }
}

/// Run a capture session until interrupted
pub async fn cast(args: CastArgs) -> Result<()> {
    println!("Portalcast - Starting Capture\n");

    let config = args.into_config()?;
    let (width, height) = config.preset.resolution();

    println!("Configuration:");
    println!("  Size:          {}x{} @ {} fps", width, height, config.preset.fps());
    println!(
        "  Layouts:       {}",
        config
            .layouts
            .iter()
            .map(|l| l.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Buffers:       {}..{}", config.min_buffers, config.max_buffers);
    println!(
        "  Renegotiation: {} every {} ms",
        config.renegotiation.mode,
        config.renegotiation.interval.as_millis()
    );
    match config.local_node {
        Some(node_id) => println!("  Source:        local node {}", node_id),
        None => println!("  Source:        ScreenCast portal"),
    }
    println!();

    if config.local_node.is_none() {
        println!("Waiting for source selection...");
        println!("(A dialog should appear to select your screen)\n");
    }
    println!("Press Ctrl+C to stop...");
    if config.renegotiation.mode != RenegotiationMode::Off {
        println!("Send SIGUSR1 to renegotiate immediately.");
    }
    println!();

    let requests = renegotiation_requests();
    let summary = match run_capture(&config, MemorySurface::new(), shutdown_signal(), requests).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(hint) = e.user_hint() {
                eprintln!("Hint: {}", hint);
            }
            return Err(anyhow::Error::new(e).context("Capture failed"));
        }
    };

    println!("Capture stopped ({}).", summary.reason);
    if let Some(stream) = &summary.stream {
        println!("  Node:            {} ({})", stream.node_id, stream.source_kind);
    }
    if let Some(format) = &summary.format {
        println!("  Format:          {}", format);
    }
    println!("  Frames:          {}", summary.stats.frames_presented);
    println!("  Skipped:         {}", summary.stats.frames_skipped);
    println!("  Recycled:        {}", summary.stats.buffers_recycled);
    println!("  Renegotiations:  {}", summary.stats.renegotiations);
    if let Some(token) = summary.restore_token() {
        println!();
        println!("Restore token: {}", token);
        println!("Store it with `portalcast config set-token <TOKEN>` to skip the dialog next time.");
    }

    Ok(())
}

/// Signal that ended the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut sigterm = match signal::unix::signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(stream) => stream.recv().await,
            None => None,
        }
    };

    match first_signal(signal::ctrl_c(), terminate).await {
        ShutdownSignal::Interrupt => println!("\nReceived interrupt signal..."),
        ShutdownSignal::Terminate => info!("Received SIGTERM"),
    }
}

/// Wait for whichever signal arrives first
///
/// A source that could not be installed never fires; the other one is
/// still observed.
async fn first_signal<I, T>(interrupt: I, terminate: T) -> ShutdownSignal
where
    I: Future<Output = std::io::Result<()>>,
    T: Future<Output = Option<()>>,
{
    let interrupt = async {
        if let Err(e) = interrupt.await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        if terminate.await.is_none() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    }
}

/// Forward SIGUSR1 as on-demand renegotiation requests
fn renegotiation_requests() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    match signal::unix::signal(SignalKind::user_defined1()) {
        Ok(mut stream) => {
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Renegotiation requested");
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            });
        }
        Err(e) => warn!("Failed to listen for SIGUSR1: {}", e),
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_interrupt_still_observes_terminate() {
        let interrupt = async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        let terminate = async {
            tokio::task::yield_now().await;
            Some(())
        };
        assert_eq!(first_signal(interrupt, terminate).await, ShutdownSignal::Terminate);
    }

    #[tokio::test]
    async fn test_interrupt_wins_when_terminate_is_missing() {
        let interrupt = async {
            tokio::task::yield_now().await;
            Ok(())
        };
        let terminate = async { None::<()> };
        assert_eq!(first_signal(interrupt, terminate).await, ShutdownSignal::Interrupt);
    }

    #[test]
    fn test_oversized_size_flag_is_rejected() {
        let args = CastArgs {
            size: Some("10000x10000@60".to_string()),
            renegotiate: None,
            interval_ms: None,
            cursor: None,
            restore_token: None,
            no_portal: None,
            config: Some(PathBuf::from("/nonexistent/portalcast.toml")),
        };
        let err = args.into_config().unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
