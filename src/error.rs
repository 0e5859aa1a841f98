//! The error types shared by every protocol in this crate.

use thiserror::Error as ThisError;

/// Errors that can surface at a protocol's application-facing API boundary.
///
/// Per the propagation policy: corruption, loss, duplication, and
/// reordering are handled silently inside the protocol state machines.
/// Retransmission timer expiry is an internal event, not an error. Only
/// the variants below are ever returned to application code.
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum Error {
    /// A decoded frame's checksum did not match, or its payload length was
    /// inconsistent with the frame size.
    #[error("corrupted packet: expected checksum {expected:#06x}, computed {actual:#06x}")]
    Corruption {
        expected: u16,
        actual: u16,
    },

    /// A decoded frame was too short to contain a full header.
    #[error("corrupted packet: frame too short ({len} bytes)")]
    Truncated { len: usize },

    /// An operation deadline elapsed before it could complete.
    #[error("operation timed out")]
    Timeout,

    /// The local side has closed and will not accept or produce more data.
    #[error("connection closed locally")]
    ConnectionClosed,

    /// The connection was reset by the peer, or the retransmission count
    /// exceeded the configured cap.
    #[error("connection reset")]
    ConnectionReset,

    /// A packet arrived that is impossible given the current protocol
    /// state (e.g. an ACK while CLOSED). The offending packet is dropped;
    /// this error never corrupts protocol state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A non-blocking send could not be accepted because the sender's
    /// window is full.
    #[error("send window is full")]
    WindowFull,

    /// A construction-time configuration was rejected, e.g. a Selective
    /// Repeat window exceeding 2^(k-1).
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
