//! Error types for portalcast

use thiserror::Error;

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Main error type for portalcast operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// D-Bus communication error, malformed response or missing field
    #[error("Bus error: {0}")]
    Bus(String),

    /// The portal answered a request with a non-zero status
    #[error("Portal rejected {step} (status {status})")]
    PortalRejected {
        /// Request that was rejected
        step: &'static str,
        /// Response status code (1 = cancelled by user, 2 = other)
        status: u32,
    },

    /// The bus connection went away while requests were pending
    #[error("Bus connection lost")]
    TransportLost,

    /// No usable PipeWire transport (bad fd, context or loop failure)
    #[error("PipeWire transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The producer picked a pixel layout we cannot present
    #[error("Incompatible stream format: {0}")]
    FormatIncompatible(String),

    /// Transient buffer problem; logged and skipped, never fatal
    #[error("Buffer fault: {0}")]
    BufferFault(String),

    /// Negotiation was cancelled locally
    #[error("Portal negotiation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CaptureError>,
    },
}

/// Coarse classification of a [`CaptureError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Bus,
    PortalRejected,
    TransportLost,
    TransportUnavailable,
    FormatIncompatible,
    BufferFault,
    Cancelled,
    Config,
    Io,
}

impl CaptureError {
    /// Create a bus error
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Self::FormatIncompatible(msg.into())
    }

    /// Create a buffer fault
    pub fn buffer(msg: impl Into<String>) -> Self {
        Self::BufferFault(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bus(_) => ErrorKind::Bus,
            Self::PortalRejected { .. } => ErrorKind::PortalRejected,
            Self::TransportLost => ErrorKind::TransportLost,
            Self::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            Self::FormatIncompatible(_) => ErrorKind::FormatIncompatible,
            Self::BufferFault(_) => ErrorKind::BufferFault,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::WithContext { source, .. } => source.kind(),
        }
    }

    /// Whether this error should stop the process
    ///
    /// Buffer faults are recovered locally by skipping a frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::BufferFault)
    }

    /// A short hint for the user about how to fix the problem
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::Bus | ErrorKind::TransportLost => {
                Some("Check that xdg-desktop-portal and a backend for your compositor are running")
            }
            ErrorKind::PortalRejected => {
                Some("The screencast request was denied or dismissed in the portal dialog")
            }
            ErrorKind::TransportUnavailable => {
                Some("Check that PipeWire is running (systemctl --user status pipewire)")
            }
            ErrorKind::FormatIncompatible => {
                Some("Try a different pixel layout list in the [stream] section of config.toml")
            }
            ErrorKind::Config => Some("Check ~/.config/portalcast/config.toml for errors"),
            ErrorKind::BufferFault | ErrorKind::Cancelled | ErrorKind::Io => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// Conversions from external error types

impl From<zbus::Error> for CaptureError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::InputOutput(_) => Self::TransportLost,
            other => Self::Bus(format!("D-Bus error: {}", other)),
        }
    }
}

impl From<zbus::zvariant::Error> for CaptureError {
    fn from(err: zbus::zvariant::Error) -> Self {
        Self::Bus(format!("Malformed D-Bus value: {}", err))
    }
}

impl From<pipewire::Error> for CaptureError {
    fn from(err: pipewire::Error) -> Self {
        Self::TransportUnavailable(err.to_string())
    }
}
