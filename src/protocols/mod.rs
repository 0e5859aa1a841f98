//! The protocol families this crate implements, from simplest to most
//! capable: a single window of one ([`stop_and_wait`]), a pipelined
//! sender with one retransmission timer ([`gbn`]), a pipelined sender
//! with per-packet timers and receiver buffering ([`sr`]), and a
//! byte-stream transport with a handshake and graceful teardown
//! ([`tcp`]).
//!
//! Every protocol here is generic over a [`Channel`](crate::channel::Channel)
//! and built against the same shared primitives: [`codec`](crate::codec)
//! for the wire format, [`timer`](crate::timer) for retransmission
//! scheduling, and [`seqnum`](crate::seqnum) for modular sequence
//! comparisons. None of them know whether the channel underneath is an
//! in-memory pair, a [`Simulator`](crate::channel::simulator::Simulator),
//! or a real socket.

pub mod gbn;
pub mod sr;
pub mod stop_and_wait;
pub mod tcp;
