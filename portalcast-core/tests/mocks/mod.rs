//! Mock infrastructure for testing
//!
//! Stand-ins for the session bus, the portal handoff, the producer's buffer
//! queue and the presentation surface. None of them need a running bus or
//! PipeWire daemon.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use portalcast_core::error::{CaptureError, ErrorKind, Result};
use portalcast_core::formats::PixelLayout;
use portalcast_core::portal::request::{OptionValue, RequestHandle, RequestOptions};
use portalcast_core::portal::router::{Response, Results, Signal, StreamEntry};
use portalcast_core::portal::{PortalBus, PortalHandoff, SessionHandle};
use portalcast_core::stream::{BufferQueue, FrameBuffer, Plane};
use portalcast_core::surface::{MemorySurface, PresentationSurface, TextureLock};
use portalcast_core::types::{StreamDescriptor, TransportHandle};

/// Unique name the mock bus reports
pub const UNIQUE_NAME: &str = ":1.42";

/// Session path the tests hand back from `CreateSession`
pub const SESSION_PATH: &str = "/org/freedesktop/portal/desktop/session/1_42/portalcast_test";

/// A method call seen by [`MockBus`]
#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    CreateSession(RequestOptions),
    SelectSources(String, RequestOptions),
    Start(String, String, RequestOptions),
    OpenPipeWireRemote(String),
    CloseSession(String),
}

impl BusCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession(_) => "CreateSession",
            Self::SelectSources(..) => "SelectSources",
            Self::Start(..) => "Start",
            Self::OpenPipeWireRemote(_) => "OpenPipeWireRemote",
            Self::CloseSession(_) => "CloseSession",
        }
    }

    fn options(&self) -> Option<&RequestOptions> {
        match self {
            Self::CreateSession(options)
            | Self::SelectSources(_, options)
            | Self::Start(_, _, options) => Some(options),
            _ => None,
        }
    }
}

/// What `OpenPipeWireRemote` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteReply {
    /// A connected unix socket
    Socket,
    /// A descriptor that is not a socket
    NotASocket,
    /// A bus error
    Error,
}

/// Scripted portal bus
pub struct MockBus {
    pub calls: Vec<BusCall>,
    pub cursor_modes: Option<u32>,
    pub version: Option<u32>,
    pub remote: RemoteReply,
    pub fail_create: bool,
    peers: Vec<UnixStream>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            cursor_modes: Some(0b111),
            version: Some(5),
            remote: RemoteReply::Socket,
            fail_create: false,
            peers: Vec::new(),
        }
    }

    pub fn with_cursor_modes(mut self, modes: Option<u32>) -> Self {
        self.cursor_modes = modes;
        self
    }

    pub fn with_version(mut self, version: Option<u32>) -> Self {
        self.version = version;
        self
    }

    pub fn with_remote(mut self, remote: RemoteReply) -> Self {
        self.remote = remote;
        self
    }

    /// Names of the calls made so far
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.iter().map(BusCall::name).collect()
    }

    /// Calls made with the given name
    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|call| call.name() == name).count()
    }

    /// Response path of the most recent request
    pub fn last_request_path(&self) -> String {
        let token = self
            .calls
            .iter()
            .rev()
            .find_map(|call| match call.options()?.get("handle_token")? {
                OptionValue::Str(token) => Some(token.clone()),
                _ => None,
            })
            .expect("no request has been issued");
        RequestHandle::with_token(UNIQUE_NAME, token).path()
    }

    /// Options of the last `SelectSources` call
    pub fn select_options(&self) -> Option<&RequestOptions> {
        self.calls.iter().rev().find_map(|call| match call {
            BusCall::SelectSources(_, options) => Some(options),
            _ => None,
        })
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalBus for MockBus {
    fn unique_name(&self) -> String {
        UNIQUE_NAME.to_string()
    }

    fn available_cursor_modes(&self) -> Option<u32> {
        self.cursor_modes
    }

    fn version(&self) -> Option<u32> {
        self.version
    }

    async fn create_session(&mut self, options: &RequestOptions) -> Result<()> {
        self.calls.push(BusCall::CreateSession(options.clone()));
        if self.fail_create {
            return Err(CaptureError::bus("org.freedesktop.DBus.Error.ServiceUnknown"));
        }
        Ok(())
    }

    async fn select_sources(
        &mut self,
        session: &SessionHandle,
        options: &RequestOptions,
    ) -> Result<()> {
        self.calls
            .push(BusCall::SelectSources(session.to_string(), options.clone()));
        Ok(())
    }

    async fn start(
        &mut self,
        session: &SessionHandle,
        parent_window: &str,
        options: &RequestOptions,
    ) -> Result<()> {
        self.calls.push(BusCall::Start(
            session.to_string(),
            parent_window.to_string(),
            options.clone(),
        ));
        Ok(())
    }

    async fn open_pipewire_remote(&mut self, session: &SessionHandle) -> Result<OwnedFd> {
        self.calls
            .push(BusCall::OpenPipeWireRemote(session.to_string()));
        match self.remote {
            RemoteReply::Socket => {
                let (ours, theirs) = UnixStream::pair()?;
                self.peers.push(theirs);
                Ok(OwnedFd::from(ours))
            }
            RemoteReply::NotASocket => Ok(OwnedFd::from(std::fs::File::open("/dev/null")?)),
            RemoteReply::Error => Err(CaptureError::bus("No fd in reply")),
        }
    }

    async fn close_session(&mut self, session: &SessionHandle) -> Result<()> {
        self.calls.push(BusCall::CloseSession(session.to_string()));
        Ok(())
    }
}

/// Something the controller told its handoff
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffEvent {
    Ready(StreamDescriptor),
    Failed(ErrorKind),
    SessionClosed,
}

/// Records the controller's terminal outcome
#[derive(Default)]
pub struct MockHandoff {
    pub events: Vec<HandoffEvent>,
    pub transports: Vec<TransportHandle>,
}

impl MockHandoff {
    pub fn ready_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, HandoffEvent::Ready(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, HandoffEvent::Failed(_)))
            .count()
    }
}

impl PortalHandoff for MockHandoff {
    fn on_ready(&mut self, transport: TransportHandle, stream: StreamDescriptor) {
        self.transports.push(transport);
        self.events.push(HandoffEvent::Ready(stream));
    }

    fn on_failed(&mut self, error: CaptureError) {
        self.events.push(HandoffEvent::Failed(error.kind()));
    }

    fn on_session_closed(&mut self) {
        self.events.push(HandoffEvent::SessionClosed);
    }
}

/// `Response` signal on `path`
pub fn response(path: impl Into<String>, response: Response) -> Signal {
    Signal::Response {
        path: path.into(),
        response,
    }
}

/// Successful `CreateSession` results
pub fn session_created() -> Response {
    Response::success(Results {
        session_handle: Some(SESSION_PATH.to_string()),
        ..Default::default()
    })
}

/// Successful `Start` results with one monitor stream
pub fn stream_started(node_id: u32, restore_token: Option<&str>) -> Response {
    Response::success(Results {
        streams: Some(vec![StreamEntry {
            node_id,
            source_type: Some(1),
            size: Some((1920, 1080)),
        }]),
        restore_token: restore_token.map(str::to_string),
        ..Default::default()
    })
}

/// `Session.Closed` on the test session
pub fn session_closed() -> Signal {
    Signal::Closed {
        path: SESSION_PATH.to_string(),
    }
}

/// A producer buffer
#[derive(Debug, Clone)]
pub struct MockBuffer {
    pub id: u32,
    pub bytes: Option<Vec<u8>>,
    pub stride: usize,
}

impl MockBuffer {
    /// Buffer filled with `value`
    pub fn filled(id: u32, value: u8, stride: usize, rows: usize) -> Self {
        Self {
            id,
            bytes: Some(vec![value; stride * rows]),
            stride,
        }
    }

    /// Buffer without mapped memory
    pub fn unmapped(id: u32) -> Self {
        Self {
            id,
            bytes: None,
            stride: 0,
        }
    }
}

impl FrameBuffer for MockBuffer {
    fn plane(&mut self) -> Option<Plane<'_>> {
        let bytes = self.bytes.as_deref()?;
        Some(Plane {
            bytes,
            stride: self.stride,
        })
    }
}

/// Producer queue holding scripted buffers
#[derive(Default)]
pub struct MockQueue {
    filled: RefCell<VecDeque<MockBuffer>>,
    returned: RefCell<Vec<u32>>,
    dequeued: RefCell<usize>,
}

impl MockQueue {
    pub fn with_buffers(buffers: Vec<MockBuffer>) -> Self {
        Self {
            filled: RefCell::new(buffers.into()),
            ..Default::default()
        }
    }

    /// Ids given back, in order
    pub fn returned(&self) -> Vec<u32> {
        self.returned.borrow().clone()
    }

    /// Buffers handed out
    pub fn dequeued(&self) -> usize {
        *self.dequeued.borrow()
    }
}

impl BufferQueue for MockQueue {
    type Buffer<'a> = MockBuffer;

    fn dequeue(&self) -> Option<MockBuffer> {
        let buffer = self.filled.borrow_mut().pop_front()?;
        *self.dequeued.borrow_mut() += 1;
        Some(buffer)
    }

    fn queue(&self, buffer: MockBuffer) {
        self.returned.borrow_mut().push(buffer.id);
    }
}

/// Memory surface with lock failure injection
pub struct MockSurface {
    pub inner: MemorySurface,
    pub fail_lock: bool,
    pub unlocks: usize,
}

impl MockSurface {
    pub fn new() -> Self {
        Self {
            inner: MemorySurface::new(),
            fail_lock: false,
            unlocks: 0,
        }
    }

    /// Surface with a ready texture
    pub fn with_texture(layout: PixelLayout, width: u32, height: u32) -> Self {
        let mut surface = Self::new();
        surface
            .inner
            .create_texture(layout, width, height)
            .expect("texture");
        surface
    }
}

impl Default for MockSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSurface for MockSurface {
    fn supported_layouts(&self) -> Vec<PixelLayout> {
        self.inner.supported_layouts()
    }

    fn create_texture(&mut self, layout: PixelLayout, width: u32, height: u32) -> Result<()> {
        self.inner.create_texture(layout, width, height)
    }

    fn lock(&mut self) -> Result<TextureLock<'_>> {
        if self.fail_lock {
            return Err(CaptureError::buffer("Injected lock failure"));
        }
        self.inner.lock()
    }

    fn unlock(&mut self) {
        self.unlocks += 1;
        self.inner.unlock();
    }

    fn present(&mut self) {
        self.inner.present();
    }
}
