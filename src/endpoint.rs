//! The addressing type shared by every protocol's application API.

use std::net::SocketAddr;

/// A datagram endpoint: the (address, port) pair a [`Channel`](crate::channel::Channel)
/// sends to or receives from.
///
/// This crate does not model IP addressing, routing, or link-layer
/// concerns — those belong to the out-of-scope raw UDP I/O layer. An
/// `Endpoint` is simply whatever a concrete `Channel` implementation uses
/// to name a peer; the in-memory channel in [`channel::memory`](crate::channel::memory)
/// uses it as an opaque lookup key.
pub type Endpoint = SocketAddr;
