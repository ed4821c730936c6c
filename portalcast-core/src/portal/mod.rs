//! xdg-desktop-portal ScreenCast negotiation
//!
//! - [`request`]: request handles, tokens and option dictionaries
//! - [`router`]: dispatches `Response`/`Closed` signals to waiting requests
//! - [`controller`]: the negotiation state machine
//! - [`dbus`]: the session bus driver

pub mod controller;
pub mod dbus;
pub mod request;
pub mod router;

pub use controller::{
    PortalBus, PortalController, PortalEvent, PortalHandoff, PortalOutcome, PortalState,
    SessionHandle,
};
pub use dbus::{DbusPortal, PortalSignals};
pub use request::{RequestHandle, RequestOptions};
pub use router::{Response, Results, Signal, SignalKind, SignalRouter, StreamEntry};
