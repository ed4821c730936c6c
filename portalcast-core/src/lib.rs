//! Portalcast Core Library
//!
//! Wayland screen capture through xdg-desktop-portal and PipeWire.
//!
//! This library provides:
//! - ScreenCast portal negotiation over D-Bus
//! - PipeWire stream format and buffer negotiation, with optional
//!   periodic renegotiation
//! - Frame delivery into a presentation surface
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ Portal Session  │───▶│ PipeWire Stream  │───▶│ Presentation     │
//! │ (D-Bus)         │ fd │ (own thread)     │    │ Surface          │
//! └─────────────────┘    └──────────────────┘    └──────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod formats;
pub mod portal;
pub mod session;
pub mod stream;
pub mod surface;
pub mod types;

pub use config::{CaptureConfig, Preset, RenegotiationMode};
pub use error::{CaptureError, Result};
pub use formats::PixelLayout;
pub use session::{run_capture, CaptureSummary, EndReason};
pub use surface::{MemorySurface, PresentationSurface};
pub use types::{BufferParams, NegotiatedFormat, SourceKind, StreamDescriptor, TransportHandle};
