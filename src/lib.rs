//! A family of reliable data transfer protocols layered over an
//! unreliable simulated datagram substrate.
//!
//! This crate is a teaching-grade reference implementation: its value
//! is the correctness of its protocol state machines under loss,
//! corruption, duplication, and reordering, not raw throughput or
//! real-network interoperability.
//!
//! # Organization
//!
//! - [`codec`] serializes and parses the 14-byte packet header shared
//!   by every protocol below, including the ones-complement checksum
//!   that stands in for "this packet was never sent" on mismatch.
//! - [`channel`] is the unreliable datagram abstraction every protocol
//!   is generic over: an in-memory pair for unit tests, and a
//!   [`channel::simulator::Simulator`] that injects loss, corruption,
//!   duplication, reordering, and delay for end-to-end tests.
//! - [`timer`] is the single shared keyed-timer service every
//!   protocol's retransmission logic is built on.
//! - [`seqnum`] centralizes modular sequence-number arithmetic so no
//!   protocol compares raw sequence numbers with native operators.
//! - [`message`] is the byte-collection type the simplified TCP uses
//!   for its send and receive buffers.
//! - [`protocols`] holds the protocol families themselves:
//!   [`protocols::stop_and_wait`] (rdt2.0/2.1/3.0), [`protocols::gbn`]
//!   (Go-Back-N), [`protocols::sr`] (Selective Repeat), and
//!   [`protocols::tcp`] (the simplified TCP-over-UDP transport).
//!
//! # Scope
//!
//! Out of scope: CLI front-ends, test harnesses, report generation,
//! and the raw UDP I/O layer a real [`channel::Channel`] would be
//! backed by. Congestion control, flow control beyond a fixed receive
//! window, path MTU discovery, encryption, authentication, and
//! interoperability with real TCP peers are all non-goals.

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod message;
pub mod protocols;
pub mod seqnum;
pub mod shutdown;
pub mod timer;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use message::Message;
