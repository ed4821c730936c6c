//! Core types for portalcast
//!
//! These types carry the portal's results into the stream side and describe
//! the negotiated format and the buffer layout declared back to the producer.

use serde::{Deserialize, Serialize};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::error::{CaptureError, Result};
use crate::formats::PixelLayout;

/// Kind of capture source reported by the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The portal did not say
    #[default]
    Unset,
    /// Full monitor/display capture
    Monitor,
    /// Individual window capture
    Window,
    /// Virtual source (e.g., from another application)
    Virtual,
}

impl SourceKind {
    /// Portal `source_type` bit for monitors
    pub const MONITOR_BIT: u32 = 1;
    /// Portal `source_type` bit for windows
    pub const WINDOW_BIT: u32 = 2;
    /// Portal `source_type` bit for virtual sources
    pub const VIRTUAL_BIT: u32 = 4;

    /// Decode the portal's `source_type` value
    pub fn from_portal(bits: u32) -> Self {
        match bits {
            Self::MONITOR_BIT => Self::Monitor,
            Self::WINDOW_BIT => Self::Window,
            Self::VIRTUAL_BIT => Self::Virtual,
            _ => Self::Unset,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Unset => write!(f, "Unset"),
            SourceKind::Monitor => write!(f, "Monitor"),
            SourceKind::Window => write!(f, "Window"),
            SourceKind::Virtual => write!(f, "Virtual"),
        }
    }
}

/// What the portal's `Start` response told us about the stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamDescriptor {
    /// PipeWire node id of the producer
    pub node_id: u32,
    /// Kind of source the user picked
    pub source_kind: SourceKind,
    /// Token to restore this selection in a later session
    pub restore_token: Option<String>,
}

/// PipeWire remote file descriptor handed over by the portal
///
/// `None` inside means "no portal": connect to the default local daemon.
#[derive(Debug)]
pub struct TransportHandle(Option<OwnedFd>);

impl TransportHandle {
    /// Handle owning a portal-provided descriptor
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self(Some(fd))
    }

    /// Null handle, connects to the default PipeWire daemon
    pub fn local() -> Self {
        Self(None)
    }

    /// Whether this is the null handle
    pub fn is_local(&self) -> bool {
        self.0.is_none()
    }

    /// Raw descriptor for logging
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.0.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Check that the descriptor is an open socket
    pub fn validate(&self) -> Result<()> {
        let Some(fd) = &self.0 else {
            return Ok(());
        };
        let raw = fd.as_raw_fd();
        // SAFETY: fstat only writes into the stat buffer we own.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(raw, &mut stat) } < 0 {
            return Err(CaptureError::transport(format!(
                "PipeWire remote fd {} is not open",
                raw
            )));
        }
        if stat.st_mode & libc::S_IFMT != libc::S_IFSOCK {
            return Err(CaptureError::transport(format!(
                "PipeWire remote fd {} is not a socket",
                raw
            )));
        }
        Ok(())
    }

    /// Give up the descriptor, closing responsibility moves to the caller
    pub fn into_fd(self) -> Option<OwnedFd> {
        self.0
    }
}

/// Stream format settled with the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Layout of the presentation texture
    pub layout: PixelLayout,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row stride in bytes
    pub stride: u32,
    /// Framerate as (num, denom), if the producer gave one
    pub framerate: Option<(u32, u32)>,
}

impl NegotiatedFormat {
    /// Build a format, deriving the stride from the layout
    pub fn new(layout: PixelLayout, width: u32, height: u32) -> Self {
        Self {
            layout,
            width,
            height,
            stride: layout.stride_for(width),
            framerate: None,
        }
    }

    /// Attach a framerate
    pub fn with_framerate(mut self, num: u32, denom: u32) -> Self {
        self.framerate = (denom != 0).then_some((num, denom));
        self
    }

    /// Bytes of one full frame
    pub fn frame_size(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

impl std::fmt::Display for NegotiatedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}x{}", self.layout, self.width, self.height)?;
        if let Some((num, denom)) = self.framerate {
            write!(f, " @ {}/{}", num, denom)?;
        }
        Ok(())
    }
}

/// Buffer data transport kinds, as a bit set over SPA data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataKinds(u32);

impl DataKinds {
    /// Memory pointer (`SPA_DATA_MemPtr`) only
    pub fn mem_ptr() -> Self {
        Self(1 << libspa::buffer::DataType::MemPtr.as_raw())
    }

    /// Raw bit mask
    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Buffer allocation parameters declared to the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferParams {
    /// Minimum number of buffers
    pub min_buffers: u32,
    /// Maximum number of buffers
    pub max_buffers: u32,
    /// Data blocks per buffer
    pub blocks: u32,
    /// Size of one block in bytes
    pub size: u32,
    /// Row stride in bytes
    pub stride: u32,
    /// Allowed data transport kinds
    pub data_kinds: DataKinds,
}

impl BufferParams {
    /// Default minimum buffer count
    pub const MIN_BUFFERS: u32 = 8;
    /// Upper bound on producer allocations
    pub const MAX_BUFFERS: u32 = 64;

    /// Derive the buffer layout for a negotiated format
    pub fn for_format(format: &NegotiatedFormat) -> Self {
        Self::with_bounds(format, Self::MIN_BUFFERS, Self::MAX_BUFFERS)
    }

    /// Derive the buffer layout with explicit count bounds
    ///
    /// Bounds are clamped so that `1 <= min <= max <= MAX_BUFFERS`.
    pub fn with_bounds(format: &NegotiatedFormat, min: u32, max: u32) -> Self {
        let max_buffers = max.clamp(1, Self::MAX_BUFFERS);
        let min_buffers = min.clamp(1, max_buffers);
        Self {
            min_buffers,
            max_buffers,
            blocks: 1,
            size: format.stride * format.height,
            stride: format.stride,
            data_kinds: DataKinds::mem_ptr(),
        }
    }
}
