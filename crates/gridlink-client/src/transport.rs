//! Contracts the sync engine drives: the socket and the reconnect timer.
//!
//! Both are push-style. The engine asks for a connection or a timer, and the
//! host reports what happened by calling back into the engine with the
//! [`Generation`] or [`TimerId`] the event belongs to.

use std::fmt;
use std::time::Duration;

use gridlink_core::Result;

/// Identifies one connection instance. Increases with every connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// A duplex text-frame channel.
pub trait TransportChannel {
    /// Start opening a connection for `generation`.
    ///
    /// The result arrives later as `on_transport_opened` or
    /// `on_transport_closed` for the same generation.
    fn connect(&mut self, generation: Generation);

    /// Send one text frame on the connection for `generation`.
    ///
    /// Fails with `TransportUnavailable` when that connection is gone.
    fn send(&mut self, generation: Generation, frame: String) -> Result<()>;

    /// Close the connection for `generation` with `code`.
    fn close(&mut self, generation: Generation, code: u16);
}

/// Single-shot timers for the reconnect policy.
pub trait ReconnectTimer {
    /// Fire `timer` once after `delay`.
    fn schedule(&mut self, timer: TimerId, delay: Duration);

    /// Drop `timer` if it has not fired yet.
    fn cancel(&mut self, timer: TimerId);
}
