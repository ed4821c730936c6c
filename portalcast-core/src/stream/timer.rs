//! Renegotiation timer policy
//!
//! The timer runs only while the stream is streaming. It is armed on the
//! transition into streaming and disarmed on any transition out of it.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::config::{RenegotiationMode, RenegotiationPolicy};

/// Stream state as seen by the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Unconnected,
    Connecting,
    Paused,
    Streaming,
    Error,
}

impl From<&pipewire::stream::StreamState> for StreamPhase {
    fn from(state: &pipewire::stream::StreamState) -> Self {
        use pipewire::stream::StreamState;
        match state {
            StreamState::Unconnected => Self::Unconnected,
            StreamState::Connecting => Self::Connecting,
            StreamState::Paused => Self::Paused,
            StreamState::Streaming => Self::Streaming,
            StreamState::Error(_) => Self::Error,
        }
    }
}

/// Change to apply to the loop timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Fire after the interval and every interval after that
    Arm(Duration),
    Disarm,
}

/// Decides when the renegotiation timer runs
#[derive(Debug, Clone)]
pub struct RenegotiationTimer {
    interval: Duration,
    enabled: bool,
    armed: bool,
}

impl RenegotiationTimer {
    pub fn new(policy: &RenegotiationPolicy) -> Self {
        Self {
            interval: policy.interval,
            enabled: policy.mode != RenegotiationMode::Off && !policy.interval.is_zero(),
            armed: false,
        }
    }

    /// Whether the timer is currently running
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// React to a stream state change
    pub fn on_phase(&mut self, phase: StreamPhase) -> Option<TimerCommand> {
        match (phase, self.armed) {
            (StreamPhase::Streaming, false) if self.enabled => {
                self.armed = true;
                Some(TimerCommand::Arm(self.interval))
            }
            (StreamPhase::Streaming, _) => None,
            (_, true) => {
                self.armed = false;
                Some(TimerCommand::Disarm)
            }
            (_, false) => None,
        }
    }
}

/// Pending renegotiation, shared by the loop's timer and event sources
///
/// Requests raised before the loop gets to them collapse into one.
#[derive(Debug, Clone, Default)]
pub struct RenegotiationFlag(Rc<Cell<bool>>);

impl RenegotiationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.set(true);
    }

    /// Consume the pending request, if any
    pub fn take(&self) -> bool {
        self.0.replace(false)
    }
}
