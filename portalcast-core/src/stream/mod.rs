//! PipeWire stream negotiation and frame delivery
//!
//! [`bootstrap::open`] turns a portal transport into a running
//! [`StreamConnection`]. The pieces it drives are kept free of PipeWire
//! handles where possible so they can be exercised directly:
//! [`negotiate`] decides formats and buffers, [`pump`] moves frames and
//! [`timer`] schedules renegotiation.

pub mod bootstrap;
pub mod negotiate;
pub mod pod;
pub mod pump;
pub mod timer;

pub use bootstrap::{library_version, open, StreamConnection, StreamStats};
pub use negotiate::{FormatNegotiator, FormatOffer, Renegotiation, ResizeSchedule, WireFormat};
pub use pump::{pump, BufferQueue, FrameBuffer, Plane, PumpOutcome};
pub use timer::{RenegotiationFlag, RenegotiationTimer, StreamPhase, TimerCommand};
