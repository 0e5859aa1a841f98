//! Selective Repeat: per-packet ACKs and timers on the sender, with
//! receiver-side buffering of out-of-order segments within the window.

mod receiver;
mod sender;

pub use receiver::Receiver;
pub use sender::Sender;

/// Configuration shared by an SR sender/receiver pair.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Sequence numbers are drawn from `[0, 2^seq_bits)`.
    pub seq_bits: u32,
    /// Window size `W`. Must satisfy `W <= 2^(seq_bits - 1)` — the
    /// invariant that keeps the sender and receiver windows from ever
    /// overlapping on the ring, which is what lets the receiver tell a
    /// retransmission of an already-delivered segment apart from a new
    /// one.
    pub window: u32,
    pub timeout: std::time::Duration,
}

impl Config {
    pub fn modulus(&self) -> u32 {
        1u32 << self.seq_bits
    }

    fn validate(&self) -> Result<(), crate::error::Error> {
        let max_window = self.modulus() / 2;
        if self.window == 0 || self.window > max_window {
            return Err(crate::error::Error::Configuration(format!(
                "SR window {} must be in [1, 2^({} - 1)]",
                self.window, self.seq_bits
            )));
        }
        Ok(())
    }
}
