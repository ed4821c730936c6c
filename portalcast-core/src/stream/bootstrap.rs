//! PipeWire stream bootstrap
//!
//! A [`StreamConnection`] owns a dedicated thread running the PipeWire loop.
//! The thread connects over the portal's fd (or the local daemon), offers
//! formats, declares buffers once a format is chosen and pumps frames into
//! the presentation surface.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use pipewire as pw;
use pw::spa::param::ParamType;
use pw::spa::pod::Pod;
use pw::spa::utils::Direction;
use pw::stream::{Stream, StreamFlags, StreamState};
use tracing::{debug, error, info, trace, warn};

use super::negotiate::{FormatNegotiator, Renegotiation};
use super::pod;
use super::pump::{self, PumpOutcome};
use super::timer::{RenegotiationFlag, RenegotiationTimer, StreamPhase, TimerCommand};
use crate::config::{CaptureConfig, RenegotiationMode};
use crate::error::{CaptureError, Result};
use crate::surface::PresentationSurface;
use crate::types::{NegotiatedFormat, StreamDescriptor, TransportHandle};

/// How long one loop iteration may block
const ITERATE_TIMEOUT: Duration = Duration::from_millis(100);

enum Control {
    Stop,
    Renegotiate,
}

/// Shared state between the PipeWire thread and its owner
#[derive(Default)]
struct SharedState {
    format: parking_lot::Mutex<Option<NegotiatedFormat>>,
    error: parking_lot::Mutex<Option<CaptureError>>,
    running: AtomicBool,
    frames_presented: AtomicU64,
    frames_skipped: AtomicU64,
    buffers_recycled: AtomicU64,
    renegotiations: AtomicU64,
}

impl SharedState {
    /// Keep the first error only
    fn set_error(&self, error: CaptureError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn record(&self, outcome: &PumpOutcome) {
        self.buffers_recycled
            .fetch_add(outcome.recycled() as u64, Ordering::Relaxed);
        match outcome {
            PumpOutcome::Presented { .. } => {
                let count = self.frames_presented.fetch_add(1, Ordering::Relaxed);
                if count % 300 == 0 {
                    trace!("Presented {} frames", count + 1);
                }
            }
            PumpOutcome::Skipped { .. } => {
                self.frames_skipped.fetch_add(1, Ordering::Relaxed);
            }
            PumpOutcome::Idle => {}
        }
    }
}

/// Counters for a running stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub buffers_recycled: u64,
    pub renegotiations: u64,
}

/// Handle to a stream running on its own PipeWire thread
pub struct StreamConnection {
    thread: Option<std::thread::JoinHandle<()>>,
    control_tx: Option<mpsc::Sender<Control>>,
    shared: Arc<SharedState>,
    descriptor: StreamDescriptor,
}

/// Version of the PipeWire client library we are linked against
pub fn library_version() -> String {
    // SAFETY: returns a pointer to a static NUL-terminated string
    let version = unsafe { std::ffi::CStr::from_ptr(pw::sys::pw_get_library_version()) };
    version.to_string_lossy().into_owned()
}

/// Connect a stream to `descriptor.node_id` over `transport`
///
/// Returns once the stream is connected and its loop is running, or with
/// the error that prevented it.
pub fn open<S>(
    transport: TransportHandle,
    descriptor: StreamDescriptor,
    config: &CaptureConfig,
    surface: S,
) -> Result<StreamConnection>
where
    S: PresentationSurface + 'static,
{
    transport.validate()?;
    let negotiator = FormatNegotiator::new(config, surface.supported_layouts())?;

    let shared = Arc::new(SharedState::default());
    let (control_tx, control_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);

    let state = LoopState {
        negotiator,
        surface,
        timer: RenegotiationTimer::new(&config.renegotiation),
        pending_timer: None,
        shared: shared.clone(),
        quit: false,
    };
    let mode = config.renegotiation.mode;
    let node_id = descriptor.node_id;
    let shared_clone = shared.clone();

    let thread = std::thread::Builder::new()
        .name("portalcast-pipewire".to_string())
        .spawn(move || {
            let mut ready = Some(ready_tx);
            let result = run_stream_loop(transport, node_id, mode, state, control_rx, &mut ready);
            if let Err(e) = result {
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => {
                        error!("PipeWire loop error: {}", e);
                        shared_clone.set_error(e);
                    }
                }
            }
            shared_clone.running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| CaptureError::transport(format!("Failed to spawn PipeWire thread: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamConnection {
            thread: Some(thread),
            control_tx: Some(control_tx),
            shared,
            descriptor,
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(CaptureError::transport("PipeWire thread exited during startup"))
        }
    }
}

impl StreamConnection {
    /// Stream this connection consumes
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Whether the loop thread is still running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
            && self
                .thread
                .as_ref()
                .map(|t| !t.is_finished())
                .unwrap_or(false)
    }

    /// Negotiated format, if any
    pub fn format(&self) -> Option<NegotiatedFormat> {
        *self.shared.format.lock()
    }

    /// Error that ended the loop, if any
    pub fn take_error(&self) -> Option<CaptureError> {
        self.shared.error.lock().take()
    }

    /// Current counters
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            frames_presented: self.shared.frames_presented.load(Ordering::Relaxed),
            frames_skipped: self.shared.frames_skipped.load(Ordering::Relaxed),
            buffers_recycled: self.shared.buffers_recycled.load(Ordering::Relaxed),
            renegotiations: self.shared.renegotiations.load(Ordering::Relaxed),
        }
    }

    /// Ask the loop to renegotiate now
    pub fn request_renegotiation(&self) {
        if let Some(tx) = &self.control_tx {
            let _ = tx.send(Control::Renegotiate);
        }
    }

    /// Stop the loop and join its thread
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        info!("Stopping capture stream");
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(Control::Stop);
        }
        let _ = thread.join();
        self.shared.running.store(false, Ordering::SeqCst);
        info!("Capture stream stopped");
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State touched from stream callbacks, owned by the loop thread
struct LoopState<S> {
    negotiator: FormatNegotiator,
    surface: S,
    timer: RenegotiationTimer,
    pending_timer: Option<TimerCommand>,
    shared: Arc<SharedState>,
    quit: bool,
}

impl<S> LoopState<S> {
    fn fail(&mut self, error: CaptureError) {
        self.shared.set_error(error);
        self.quit = true;
    }
}

/// Run the PipeWire loop (called from the dedicated thread)
fn run_stream_loop<S>(
    transport: TransportHandle,
    node_id: u32,
    mode: RenegotiationMode,
    state: LoopState<S>,
    control_rx: mpsc::Receiver<Control>,
    ready: &mut Option<mpsc::SyncSender<Result<()>>>,
) -> Result<()>
where
    S: PresentationSurface + 'static,
{
    pw::init();

    let shared = state.shared.clone();
    let local = transport.is_local();
    info!(
        "Initializing PipeWire capture for node {}{}",
        node_id,
        if local { " (local daemon)" } else { "" }
    );

    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| CaptureError::transport(format!("Failed to create main loop: {}", e)))?;
    let loop_ = mainloop.loop_();

    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| CaptureError::transport(format!("Failed to create context: {}", e)))?;

    let core = match transport.into_fd() {
        Some(fd) => context.connect_fd(fd, None),
        None => context.connect(None),
    }
    .map_err(|e| CaptureError::transport(format!("Failed to connect to PipeWire: {}", e)))?;

    let core_error: Rc<RefCell<Option<CaptureError>>> = Rc::new(RefCell::new(None));
    let _core_listener = core
        .add_listener_local()
        .info(|info| debug!("Connected to {} {}", info.name(), info.version()))
        .done(|id, _| trace!("Core done for object {}", id))
        .error({
            let core_error = core_error.clone();
            move |id, seq, res, message| {
                error!(
                    "PipeWire error on object {} (seq {}): {} ({})",
                    id, seq, message, res
                );
                if id == pw::core::PW_ID_CORE {
                    core_error
                        .borrow_mut()
                        .get_or_insert_with(|| core_failure(res, message));
                }
            }
        })
        .register();

    let stream = Stream::new(
        &core,
        "portalcast-capture",
        pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Video",
            *pw::keys::MEDIA_CATEGORY => "Capture",
            *pw::keys::MEDIA_ROLE => "Screen",
        },
    )
    .map_err(|e| CaptureError::transport(format!("Failed to create stream: {}", e)))?;

    let offer = state.negotiator.offer();
    let state = Rc::new(RefCell::new(state));

    let _listener = stream
        .add_local_listener_with_user_data(state.clone())
        .state_changed(|_, state, old, new| on_state_changed(&mut state.borrow_mut(), old, new))
        .param_changed(|stream, state, id, param| on_param_changed(stream, state, id, param))
        .process(|stream, state| {
            let mut guard = state.borrow_mut();
            let state = &mut *guard;
            let outcome = pump::pump(stream, &mut state.surface, state.negotiator.current());
            state.shared.record(&outcome);
        })
        .register()
        .map_err(|e| CaptureError::transport(format!("Failed to register listener: {}", e)))?;

    let format_bytes = pod::serialize_all(pod::enum_formats(&offer))?;
    let mut params = pod::as_pods(&format_bytes)?;
    stream
        .connect(
            Direction::Input,
            Some(node_id),
            StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS,
            &mut params,
        )
        .map_err(|e| CaptureError::transport(format!("Failed to connect stream: {}", e)))?;

    let renegotiate = RenegotiationFlag::new();
    let timer = loop_.add_timer({
        let renegotiate = renegotiate.clone();
        move |_| {
            trace!("Renegotiation timer fired");
            renegotiate.raise();
        }
    });
    let event = loop_.add_event({
        let renegotiate = renegotiate.clone();
        move || {
            trace!("Renegotiation requested");
            renegotiate.raise();
        }
    });

    info!("PipeWire stream connected to node {}", node_id);
    shared.running.store(true, Ordering::SeqCst);
    if let Some(tx) = ready.take() {
        let _ = tx.send(Ok(()));
    }

    loop {
        loop_.iterate(ITERATE_TIMEOUT);

        match control_rx.try_recv() {
            Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                info!("Shutdown signal received");
                break;
            }
            Ok(Control::Renegotiate) => {
                if let Err(e) = event.signal().into_result() {
                    warn!("Failed to signal renegotiation: {}", e);
                }
            }
            Err(TryRecvError::Empty) => {}
        }

        if let Some(e) = core_error.borrow_mut().take() {
            shared.set_error(e);
            break;
        }

        let (command, quit) = {
            let mut state = state.borrow_mut();
            (state.pending_timer.take(), state.quit)
        };
        if quit {
            break;
        }
        if let Some(command) = command {
            let result = match command {
                TimerCommand::Arm(interval) => {
                    debug!("Arming renegotiation timer every {:?}", interval);
                    timer.update_timer(Some(interval), Some(interval))
                }
                TimerCommand::Disarm => {
                    debug!("Disarming renegotiation timer");
                    timer.update_timer(None, None)
                }
            };
            if let Err(e) = result.into_result() {
                warn!("Failed to update renegotiation timer: {}", e);
            }
        }
        if renegotiate.take() {
            renegotiate_stream(&stream, &state, mode);
        }
    }

    info!("PipeWire main loop ended");
    Ok(())
}

/// Error recorded when the daemon reports a failure on the core object
fn core_failure(res: i32, message: &str) -> CaptureError {
    CaptureError::transport(format!("PipeWire core error {}: {}", res, message))
}

fn on_state_changed<S>(state: &mut LoopState<S>, old: StreamState, new: StreamState) {
    debug!("Stream state changed: {:?} -> {:?}", old, new);
    if let Some(command) = state.timer.on_phase(StreamPhase::from(&new)) {
        state.pending_timer = Some(command);
    }

    match new {
        StreamState::Streaming => {
            info!("PipeWire stream is now streaming");
        }
        StreamState::Paused => {
            debug!("Stream paused");
        }
        StreamState::Error(msg) => {
            error!("Stream error: {}", msg);
            state.fail(CaptureError::transport(msg));
        }
        StreamState::Unconnected => {
            info!("Stream disconnected");
            state.quit = true;
        }
        StreamState::Connecting => {}
    }
}

fn on_param_changed<S>(stream: &Stream, state: &RefCell<LoopState<S>>, id: u32, param: Option<&Pod>)
where
    S: PresentationSurface,
{
    if id != ParamType::Format.as_raw() {
        return;
    }
    let wire = match param {
        None => None,
        Some(param) => match pod::decode_format(param) {
            Some(wire) => Some(wire),
            None => {
                warn!("Failed to parse video format");
                return;
            }
        },
    };

    let params = {
        let mut guard = state.borrow_mut();
        let state = &mut *guard;
        let result = state
            .negotiator
            .on_param_changed(id, wire.as_ref(), &mut state.surface);
        *state.shared.format.lock() = state.negotiator.current();
        match result {
            Ok(Some(params)) => params,
            Ok(None) => return,
            Err(e) => {
                error!("Format negotiation failed: {}", e);
                state.fail(e);
                return;
            }
        }
    };

    let bytes = match pod::serialize(pod::buffers(&params)) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to build buffer params: {}", e);
            return;
        }
    };
    let Some(buffers) = Pod::from_bytes(&bytes) else {
        return;
    };
    match stream.update_params(&mut [buffers]) {
        Ok(()) => debug!(
            "Declared {}..{} buffers of {} bytes",
            params.min_buffers, params.max_buffers, params.size
        ),
        Err(e) => warn!("Failed to declare buffers: {}", e),
    }
}

/// Apply one renegotiation tick
///
/// Ticks that land while an earlier offer is unanswered replace it.
fn renegotiate_stream<S>(stream: &Stream, state: &RefCell<LoopState<S>>, mode: RenegotiationMode) {
    let (renegotiation, shared) = {
        let mut state = state.borrow_mut();
        (state.negotiator.renegotiate(mode), state.shared.clone())
    };
    let Some(renegotiation) = renegotiation else {
        return;
    };

    let objects = match &renegotiation {
        Renegotiation::Format(offer) => pod::enum_formats(offer),
        Renegotiation::Buffers(params) => vec![pod::buffers(params)],
    };
    let bytes = match pod::serialize_all(objects) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to build renegotiation params: {}", e);
            return;
        }
    };
    let mut params = match pod::as_pods(&bytes) {
        Ok(params) => params,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };

    match stream.update_params(&mut params) {
        Ok(()) => {
            let count = shared.renegotiations.fetch_add(1, Ordering::Relaxed) + 1;
            info!("Renegotiation {} sent: {:?}", count, renegotiation);
        }
        Err(e) => warn!("Renegotiation failed: {}", e),
    }
}
