//! Capture session orchestration
//!
//! Portal negotiation, then the PipeWire stream on its own thread, then
//! steady state until shutdown, a remote close or a fatal stream error.
//! Teardown always stops the stream before closing the portal session.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::portal::{DbusPortal, PortalController, PortalEvent, PortalOutcome};
use crate::stream::{self, StreamConnection, StreamStats};
use crate::surface::PresentationSurface;
use crate::types::{NegotiatedFormat, StreamDescriptor, TransportHandle};

/// How often the stream thread is checked for an early exit
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(250);

/// Why a capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Shutdown was requested
    Shutdown,
    /// The portal closed the session
    SessionClosed,
    /// The stream loop ended on its own
    StreamEnded,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown requested"),
            Self::SessionClosed => write!(f, "session closed by the portal"),
            Self::StreamEnded => write!(f, "stream ended"),
        }
    }
}

/// What a finished capture did
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    /// Why it ended
    pub reason: EndReason,
    /// Stream that was consumed, if negotiation got that far
    pub stream: Option<StreamDescriptor>,
    /// Last negotiated format
    pub format: Option<NegotiatedFormat>,
    /// Final counters
    pub stats: StreamStats,
}

impl CaptureSummary {
    /// Token the portal returned for restoring this selection
    pub fn restore_token(&self) -> Option<&str> {
        self.stream.as_ref()?.restore_token.as_deref()
    }
}

/// Run one capture until `shutdown` resolves or the stream ends
///
/// Every message on `renegotiate` asks the running stream for an immediate
/// renegotiation in the configured mode.
pub async fn run_capture<S, F>(
    config: &CaptureConfig,
    surface: S,
    shutdown: F,
    mut renegotiate: mpsc::UnboundedReceiver<()>,
) -> Result<CaptureSummary>
where
    S: PresentationSurface + 'static,
    F: Future<Output = ()>,
{
    if let Some(node_id) = config.local_node {
        return run_local(config, surface, node_id, shutdown, renegotiate).await;
    }

    let portal = DbusPortal::connect().await?;
    // Subscribe before the first request goes out.
    let mut signals = portal.signals().await?;
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
    let mut controller = PortalController::new(portal, outcome_tx, config.portal.clone());

    tokio::pin!(shutdown);
    let mut surface = Some(surface);
    let mut connection: Option<StreamConnection> = None;
    let mut descriptor: Option<StreamDescriptor> = None;
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);

    controller.start().await;

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                controller.handle(PortalEvent::Cancel).await;
                break Ok(EndReason::Shutdown);
            }
            event = signals.next_event(), if !signals.is_lost() => {
                controller.handle(event).await;
            }
            Some(outcome) = outcomes.recv() => match outcome {
                PortalOutcome::Ready(transport, stream) => {
                    let Some(surface) = surface.take() else {
                        warn!("Ignoring a second ready transport");
                        continue;
                    };
                    if let Some(token) = &stream.restore_token {
                        debug!("Portal returned restore token {}", token);
                    }
                    match open_stream(transport, stream.clone(), config, surface).await {
                        Ok(opened) => {
                            connection = Some(opened);
                            descriptor = Some(stream);
                        }
                        Err(e) => break Err(e),
                    }
                }
                PortalOutcome::Failed(e) => break Err(e),
                PortalOutcome::SessionClosed => break Ok(EndReason::SessionClosed),
            },
            Some(()) = renegotiate.recv(), if connection.is_some() => {
                if let Some(connection) = &connection {
                    connection.request_renegotiation();
                }
            }
            _ = watchdog.tick(), if connection.is_some() => {
                if let Some(end) = connection.as_ref().and_then(stream_end) {
                    break end;
                }
            }
        }
    };

    let (format, stats) = finish(connection);
    controller.close().await;

    let reason = result?;
    info!("Capture finished: {}", reason);
    Ok(CaptureSummary {
        reason,
        stream: descriptor,
        format,
        stats,
    })
}

/// Capture from a node on the local daemon, without the portal
async fn run_local<S, F>(
    config: &CaptureConfig,
    surface: S,
    node_id: u32,
    shutdown: F,
    mut renegotiate: mpsc::UnboundedReceiver<()>,
) -> Result<CaptureSummary>
where
    S: PresentationSurface + 'static,
    F: Future<Output = ()>,
{
    info!("Skipping the portal, connecting to node {} locally", node_id);
    let descriptor = StreamDescriptor {
        node_id,
        ..Default::default()
    };
    let connection = open_stream(TransportHandle::local(), descriptor.clone(), config, surface).await?;

    tokio::pin!(shutdown);
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    let result = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(EndReason::Shutdown),
            Some(()) = renegotiate.recv() => connection.request_renegotiation(),
            _ = watchdog.tick() => {
                if let Some(end) = stream_end(&connection) {
                    break end;
                }
            }
        }
    };

    let (format, stats) = finish(Some(connection));
    let reason = result?;
    info!("Capture finished: {}", reason);
    Ok(CaptureSummary {
        reason,
        stream: Some(descriptor),
        format,
        stats,
    })
}

/// Start the stream thread without holding up the runtime
///
/// `stream::open` blocks until the loop thread reports in.
async fn open_stream<S>(
    transport: TransportHandle,
    descriptor: StreamDescriptor,
    config: &CaptureConfig,
    surface: S,
) -> Result<StreamConnection>
where
    S: PresentationSurface + 'static,
{
    let config = config.clone();
    tokio::task::spawn_blocking(move || stream::open(transport, descriptor, &config, surface))
        .await
        .map_err(|e| CaptureError::transport(format!("Stream startup task failed: {}", e)))?
}

/// Outcome if the stream thread has exited
fn stream_end(connection: &StreamConnection) -> Option<Result<EndReason>> {
    if connection.is_running() {
        return None;
    }
    Some(end_reason(connection.take_error()))
}

/// A loop that stopped without recording an error ended cleanly
fn end_reason(error: Option<CaptureError>) -> Result<EndReason> {
    match error {
        Some(e) => Err(e),
        None => Ok(EndReason::StreamEnded),
    }
}

fn finish(connection: Option<StreamConnection>) -> (Option<NegotiatedFormat>, StreamStats) {
    match connection {
        Some(mut connection) => {
            connection.stop();
            (connection.format(), connection.stats())
        }
        None => (None, StreamStats::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_clean_stop_ends_stream() {
        assert_eq!(end_reason(None).unwrap(), EndReason::StreamEnded);
    }

    #[test]
    fn test_loop_error_fails_capture() {
        let err = end_reason(Some(CaptureError::transport("PipeWire core error -32: broken pipe")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportUnavailable);

        let err = end_reason(Some(CaptureError::TransportLost)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportLost);
    }

    #[test]
    fn test_summary_restore_token() {
        let summary = CaptureSummary {
            reason: EndReason::Shutdown,
            stream: Some(StreamDescriptor {
                node_id: 7,
                restore_token: Some("abc".to_string()),
                ..Default::default()
            }),
            format: None,
            stats: StreamStats::default(),
        };
        assert_eq!(summary.restore_token(), Some("abc"));
    }
}
