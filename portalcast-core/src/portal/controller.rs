//! ScreenCast portal negotiation
//!
//! The controller walks `CreateSession → SelectSources → Start →
//! OpenPipeWireRemote`. Each request is issued through a [`PortalBus`] and
//! answered by a `Response` signal fed back through [`PortalController::handle`].
//! Exactly one of [`PortalHandoff::on_ready`] or [`PortalHandoff::on_failed`]
//! is called per negotiation.

use std::os::fd::OwnedFd;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::request::{new_token, RequestHandle, RequestOptions};
use super::router::{Response, Signal, SignalKind, SignalRouter, SubscriptionId};
use crate::config::PortalOptions;
use crate::error::{CaptureError, ErrorKind, Result};
use crate::types::{SourceKind, StreamDescriptor, TransportHandle};

/// Portal-issued session object path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Wrap a session object path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Object path as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Method calls the controller makes against the ScreenCast portal
///
/// Each request method returns once the portal has accepted the call; its
/// result arrives later as a `Response` signal.
#[allow(async_fn_in_trait)]
pub trait PortalBus {
    /// Unique name of our bus connection
    fn unique_name(&self) -> String;

    /// `AvailableCursorModes` property, if the portal exposes it
    fn available_cursor_modes(&self) -> Option<u32>;

    /// `version` property, if the portal exposes it
    fn version(&self) -> Option<u32>;

    /// `CreateSession(a{sv})`
    async fn create_session(&mut self, options: &RequestOptions) -> Result<()>;

    /// `SelectSources(o, a{sv})`
    async fn select_sources(
        &mut self,
        session: &SessionHandle,
        options: &RequestOptions,
    ) -> Result<()>;

    /// `Start(o, s, a{sv})`
    async fn start(
        &mut self,
        session: &SessionHandle,
        parent_window: &str,
        options: &RequestOptions,
    ) -> Result<()>;

    /// `OpenPipeWireRemote(o, a{sv}) -> h`, resolved against the reply's fd list
    async fn open_pipewire_remote(&mut self, session: &SessionHandle) -> Result<OwnedFd>;

    /// `org.freedesktop.portal.Session.Close()`
    async fn close_session(&mut self, session: &SessionHandle) -> Result<()>;
}

/// Receives the controller's terminal outcome
pub trait PortalHandoff {
    /// Negotiation succeeded; the transport now belongs to the receiver
    fn on_ready(&mut self, transport: TransportHandle, stream: StreamDescriptor);

    /// Negotiation failed
    fn on_failed(&mut self, error: CaptureError);

    /// The portal closed a session that had reached `Ready`
    fn on_session_closed(&mut self);
}

/// Outcome message for channel-based handoff
#[derive(Debug)]
pub enum PortalOutcome {
    Ready(TransportHandle, StreamDescriptor),
    Failed(CaptureError),
    SessionClosed,
}

impl PortalHandoff for mpsc::UnboundedSender<PortalOutcome> {
    fn on_ready(&mut self, transport: TransportHandle, stream: StreamDescriptor) {
        if self.send(PortalOutcome::Ready(transport, stream)).is_err() {
            warn!("Portal outcome receiver is gone, dropping transport");
        }
    }

    fn on_failed(&mut self, error: CaptureError) {
        if let Err(mpsc::error::SendError(outcome)) = self.send(PortalOutcome::Failed(error)) {
            warn!("Portal outcome receiver is gone, dropping {:?}", outcome);
        }
    }

    fn on_session_closed(&mut self) {
        if self.send(PortalOutcome::SessionClosed).is_err() {
            warn!("Portal outcome receiver is gone, dropping session close");
        }
    }
}

/// Events driving the controller
#[derive(Debug)]
pub enum PortalEvent {
    /// A signal arrived on the bus
    Signal(Signal),
    /// The bus connection is gone
    BusLost,
    /// The user asked to abort
    Cancel,
}

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Idle,
    SessionRequested,
    SessionEstablished,
    SourcesRequested,
    SourcesSelected,
    StartRequested,
    Started,
    TransportOpening,
    Ready,
    Failed(ErrorKind),
    Closed,
}

impl PortalState {
    /// Whether negotiation has finished, one way or another
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_) | Self::Closed)
    }
}

/// Drives one ScreenCast portal negotiation
pub struct PortalController<B, H> {
    bus: B,
    handoff: H,
    options: PortalOptions,
    router: SignalRouter,
    state: PortalState,
    session: Option<SessionHandle>,
    pending: Option<SubscriptionId>,
    closed_subscription: Option<SubscriptionId>,
    closed_by_portal: bool,
}

impl<B: PortalBus, H: PortalHandoff> PortalController<B, H> {
    /// Create a controller in the `Idle` state
    pub fn new(bus: B, handoff: H, options: PortalOptions) -> Self {
        Self {
            bus,
            handoff,
            options,
            router: SignalRouter::new(),
            state: PortalState::Idle,
            session: None,
            pending: None,
            closed_subscription: None,
            closed_by_portal: false,
        }
    }

    /// Current state
    pub fn state(&self) -> PortalState {
        self.state
    }

    /// Established session, if any
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Signal subscriptions
    pub fn router(&self) -> &SignalRouter {
        &self.router
    }

    /// The bus collaborator
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// The handoff collaborator
    pub fn handoff(&self) -> &H {
        &self.handoff
    }

    /// Issue `CreateSession`
    pub async fn start(&mut self) {
        if self.state != PortalState::Idle {
            debug!("Portal negotiation already started ({:?})", self.state);
            return;
        }

        let options = RequestOptions::new().str("session_handle_token", new_token());
        let options = match self.prepare_request(options) {
            Ok(options) => options,
            Err(e) => return self.fail(e),
        };

        info!("Requesting a screencast session");
        self.state = PortalState::SessionRequested;
        if let Err(e) = self.bus.create_session(&options).await {
            self.fail(e.with_context("CreateSession"));
        }
    }

    /// Feed one event into the state machine
    pub async fn handle(&mut self, event: PortalEvent) {
        match event {
            PortalEvent::Signal(signal) => self.on_signal(signal).await,
            PortalEvent::BusLost => {
                let pending = self.router.fail_all();
                self.pending = None;
                self.closed_subscription = None;
                debug!("Bus lost with {} pending subscriptions", pending.len());
                if self.state == PortalState::Ready {
                    self.closed_by_portal = true;
                    self.handoff.on_session_closed();
                } else {
                    self.fail(CaptureError::TransportLost);
                }
            }
            PortalEvent::Cancel => {
                if self.state.is_terminal() {
                    debug!("Ignoring cancel in state {:?}", self.state);
                } else {
                    info!("Portal negotiation cancelled");
                    self.fail(CaptureError::Cancelled);
                }
            }
        }
    }

    /// Release the session
    ///
    /// Aborts a negotiation still in flight. `Session.Close` is skipped if the
    /// portal already closed the session. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == PortalState::Closed {
            return;
        }
        if !self.state.is_terminal() {
            self.fail(CaptureError::Cancelled);
        }

        if let Some(id) = self.closed_subscription.take() {
            self.router.unsubscribe(id);
        }
        if let Some(session) = self.session.take() {
            if self.closed_by_portal {
                debug!("Session {} already closed by the portal", session);
            } else if let Err(e) = self.bus.close_session(&session).await {
                warn!("Failed to close portal session {}: {}", session, e);
            } else {
                info!("Portal session closed");
            }
        }
        self.state = PortalState::Closed;
    }

    async fn on_signal(&mut self, signal: Signal) {
        let Some((id, signal)) = self.router.route(signal) else {
            return;
        };

        match signal {
            Signal::Closed { .. } => self.on_session_closed(id),
            Signal::Response { response, .. } => {
                self.router.unsubscribe(id);
                if self.pending != Some(id) {
                    debug!("Dropping response for stale request {:?}", id);
                    return;
                }
                self.pending = None;
                self.on_response(response).await;
            }
        }
    }

    fn on_session_closed(&mut self, id: SubscriptionId) {
        // The listener fires once per session; forget it either way.
        if self.closed_subscription == Some(id) {
            self.closed_subscription = None;
            self.router.unsubscribe(id);
        }
        self.closed_by_portal = true;

        match self.state {
            PortalState::Ready => {
                info!("Portal closed the screencast session");
                self.handoff.on_session_closed();
            }
            PortalState::Failed(_) | PortalState::Closed => {}
            _ => self.fail(CaptureError::bus("Session closed by the portal during negotiation")),
        }
    }

    async fn on_response(&mut self, response: Response) {
        match self.state {
            PortalState::SessionRequested => self.on_session_created(response).await,
            PortalState::SourcesRequested => self.on_sources_selected(response).await,
            PortalState::StartRequested => self.on_started(response).await,
            state => debug!("Unexpected portal response in state {:?}", state),
        }
    }

    async fn on_session_created(&mut self, response: Response) {
        if !response.is_success() {
            warn!("Failed to create the screencast session");
            return self.fail(CaptureError::PortalRejected {
                step: "CreateSession",
                status: response.status,
            });
        }
        let Some(path) = response.results.session_handle.filter(|path| !path.is_empty()) else {
            return self.fail(CaptureError::bus("CreateSession response has no session_handle"));
        };

        let session = SessionHandle::new(path);
        match self.router.subscribe(SignalKind::Closed, session.as_str(), None) {
            Ok(id) => self.closed_subscription = Some(id),
            Err(e) => return self.fail(e),
        }
        info!("Screencast session established: {}", session);
        self.session = Some(session);
        self.state = PortalState::SessionEstablished;

        self.request_sources().await;
    }

    async fn request_sources(&mut self) {
        let Some(session) = self.session.clone() else {
            return self.fail(CaptureError::bus("No session to select sources on"));
        };

        let mut options = RequestOptions::new()
            .u32("types", SourceKind::MONITOR_BIT)
            .bool("multiple", false);

        let cursor = self.options.cursor_mode.bits();
        match self.bus.available_cursor_modes() {
            Some(modes) if modes & cursor != 0 => options = options.u32("cursor_mode", cursor),
            Some(modes) => debug!("Cursor mode {} not advertised (modes = {})", cursor, modes),
            None => debug!("Portal does not advertise cursor modes"),
        }

        if self.bus.version().is_some_and(|version| version >= 4) {
            options = options.u32("persist_mode", self.options.persist_mode.as_u32());
            if let Some(token) = &self.options.restore_token {
                options = options.str("restore_token", token.clone());
            }
        }

        let options = match self.prepare_request(options) {
            Ok(options) => options,
            Err(e) => return self.fail(e),
        };

        info!("Requesting sources from the screencast session");
        self.state = PortalState::SourcesRequested;
        if let Err(e) = self.bus.select_sources(&session, &options).await {
            self.fail(e.with_context("SelectSources"));
        }
    }

    async fn on_sources_selected(&mut self, response: Response) {
        if !response.is_success() {
            warn!("Failed to select sources for the screencast session");
            return self.fail(CaptureError::PortalRejected {
                step: "SelectSources",
                status: response.status,
            });
        }
        self.state = PortalState::SourcesSelected;
        self.request_start().await;
    }

    async fn request_start(&mut self) {
        let Some(session) = self.session.clone() else {
            return self.fail(CaptureError::bus("No session to start"));
        };
        let options = match self.prepare_request(RequestOptions::new()) {
            Ok(options) => options,
            Err(e) => return self.fail(e),
        };

        info!("Starting the portal session");
        self.state = PortalState::StartRequested;
        // No parent window: we are not an X11 or Wayland toplevel the portal can attach to.
        if let Err(e) = self.bus.start(&session, "", &options).await {
            self.fail(e.with_context("Start"));
        }
    }

    async fn on_started(&mut self, response: Response) {
        if !response.is_success() {
            warn!("The portal refused to start the stream");
            return self.fail(CaptureError::PortalRejected {
                step: "Start",
                status: response.status,
            });
        }
        let results = response.results;
        let Some(entry) = results.streams.as_ref().and_then(|streams| streams.first()) else {
            return self.fail(CaptureError::bus("Start response has no streams"));
        };

        let descriptor = StreamDescriptor {
            node_id: entry.node_id,
            source_kind: entry.source_type.map(SourceKind::from_portal).unwrap_or_default(),
            restore_token: results.restore_token.clone(),
        };
        info!(
            "Stream started: node {} ({})",
            descriptor.node_id, descriptor.source_kind
        );
        self.state = PortalState::Started;

        self.open_transport(descriptor).await;
    }

    async fn open_transport(&mut self, descriptor: StreamDescriptor) {
        let Some(session) = self.session.clone() else {
            return self.fail(CaptureError::bus("No session to open a remote for"));
        };

        info!("Opening the PipeWire remote");
        self.state = PortalState::TransportOpening;
        let fd = match self.bus.open_pipewire_remote(&session).await {
            Ok(fd) => fd,
            Err(CaptureError::TransportLost) => return self.fail(CaptureError::TransportLost),
            Err(e) => return self.fail(CaptureError::transport(format!("OpenPipeWireRemote: {}", e))),
        };

        let transport = TransportHandle::from_fd(fd);
        if let Err(e) = transport.validate() {
            return self.fail(e);
        }

        info!("PipeWire remote opened");
        self.state = PortalState::Ready;
        self.handoff.on_ready(transport, descriptor);
    }

    /// Subscribe to the next request's response and add its `handle_token`
    fn prepare_request(&mut self, options: RequestOptions) -> Result<RequestOptions> {
        let handle = RequestHandle::new(&self.bus.unique_name());
        let id = self.router.subscribe(SignalKind::Response, handle.path(), None)?;
        self.pending = Some(id);
        Ok(options.str("handle_token", handle.token()))
    }

    fn fail(&mut self, error: CaptureError) {
        if self.state.is_terminal() {
            debug!("Ignoring failure in state {:?}: {}", self.state, error);
            return;
        }
        if let Some(id) = self.pending.take() {
            self.router.unsubscribe(id);
        }
        warn!("Portal negotiation failed: {}", error);
        self.state = PortalState::Failed(error.kind());
        self.handoff.on_failed(error);
    }
}
