//! The unreliable datagram channel every protocol in this crate is built
//! to tolerate.
//!
//! Protocols never talk to a raw UDP socket directly — that plumbing is
//! out of scope here, matching the crate's separation of a transport
//! protocol from the link it runs over. Instead every protocol session
//! is generic over a [`Channel`], so the exact same Go-Back-N or TCP
//! state machine can run over an in-memory pair in a unit test, a
//! lossy/corrupting [`simulator::Simulator`] in an end-to-end test, or
//! (outside this crate) a real `UdpSocket`-backed implementation.

pub mod memory;
pub mod port;
pub mod simulator;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Error;

/// A single logical datagram link between two endpoints.
///
/// A `Channel` moves opaque byte frames — already-encoded
/// [`Packet`](crate::codec::Packet)s — with no guarantee of delivery,
/// ordering, or integrity, mirroring what UDP itself provides. All
/// reliability is built above this trait, never inside an
/// implementation of it.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Sends a single frame. Channel implementations may drop sends
    /// silently; this only returns an error if the channel itself has
    /// been closed.
    async fn send(&self, frame: Vec<u8>) -> Result<(), Error>;

    /// Waits for the next frame, or for `timeout` to elapse first.
    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, Error>;

    /// Closes the channel. Outstanding and future `recv` calls return
    /// [`Error::ConnectionClosed`].
    fn close(&self);
}
