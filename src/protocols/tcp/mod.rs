//! The simplified TCP over UDP transport: three-way handshake, sliding
//! window byte-stream transfer with cumulative ACKs, RTO estimation,
//! and four-way teardown.
//!
//! The [`tcb`] module is the pure state machine: an RFC 9293-style
//! `Tcb`, reworked to simplified rules (no options, no RST-driven
//! resets, a single retransmission timer, a fixed receive window);
//! [`connection`] and [`listener`] drive it from a single-threaded
//! event loop exactly like [`gbn`](crate::protocols::gbn) and
//! [`sr`](crate::protocols::sr) do, using the same
//! background-task-plus-request-channel shape.

pub mod tcb;
pub(crate) mod rtt;

mod connection;
mod listener;

pub use connection::Connection;
pub use listener::Listener;
pub use tcb::State;

use std::time::Duration;

use crate::endpoint::Endpoint;

/// The two endpoints of one TCP connection, carried through the [`Tcb`](tcb::Tcb)
/// purely for identification (logging, and telling connections apart in
/// a [`Listener`]'s demultiplexing table) — it plays no part in the
/// state machine's transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoints {
    pub local: Endpoint,
    pub remote: Endpoint,
}

/// Construction-time parameters for a TCP [`Connection`] or [`Listener`].
///
/// Several details are left unpinned by the original protocol
/// description and are resolved here with documented defaults: a 30
/// second MSL and fast retransmit enabled.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum segment size: payload bytes per segment.
    pub mss: usize,
    /// Fixed receive window, in bytes. This crate does not negotiate or
    /// adjust flow control beyond this fixed value.
    pub window: u32,
    /// Upper bound on bytes the application may have queued for send
    /// but not yet handed to the window; `send` blocks once this is
    /// reached, mirroring "send blocks when the send window is full"
    /// with simple, fixed backpressure rather than reacting to the
    /// live `snd_wnd` on every call.
    pub send_buffer_capacity: usize,
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    /// Retransmissions of the oldest unacked segment beyond this cap
    /// abort the connection with [`ConnectionReset`](crate::error::Error::ConnectionReset).
    pub max_retransmits: u32,
    /// How long TIME_WAIT is held before finalizing to CLOSED.
    pub msl: Duration,
    /// Whether a third duplicate ACK immediately retransmits the
    /// segment at `snd_una`, rather than waiting for the RTO.
    pub fast_retransmit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mss: 536,
            window: 64 * 1024,
            send_buffer_capacity: 256 * 1024,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
            max_retransmits: 12,
            msl: Duration::from_secs(30),
            fast_retransmit: true,
        }
    }
}
