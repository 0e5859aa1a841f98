//! Go-Back-N: a pipelined sender with a single retransmission timer and
//! a cumulative-ACK, in-order-only receiver.

mod receiver;
mod sender;

pub use receiver::Receiver;
pub use sender::Sender;

/// Configuration shared by a GBN sender/receiver pair.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Sequence numbers are drawn from `[0, 2^seq_bits)`.
    pub seq_bits: u32,
    /// Window size `W`. Must satisfy `W <= 2^seq_bits - 1`.
    pub window: u32,
    /// Retransmission timer duration.
    pub timeout: std::time::Duration,
}

impl Config {
    pub fn modulus(&self) -> u32 {
        1u32 << self.seq_bits
    }

    fn validate(&self) -> Result<(), crate::error::Error> {
        if self.window == 0 || self.window > self.modulus() - 1 {
            return Err(crate::error::Error::Configuration(format!(
                "GBN window {} must be in [1, 2^{} - 1]",
                self.window, self.seq_bits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            seq_bits: 3,
            window: 4,
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn delivers_ten_messages_in_order() {
        let (sender_channel, receiver_channel) = memory::pair();
        let mut sender = Sender::new(sender_channel, config()).unwrap();
        let mut receiver = Receiver::new(receiver_channel, config());

        let payloads: Vec<Vec<u8>> = (0..10).map(|i| format!("m{i}").into_bytes()).collect();
        let expected = payloads.clone();

        let recv_task = tokio::spawn(async move {
            let mut delivered = Vec::new();
            for _ in 0..expected.len() {
                delivered.push(receiver.recv().await.unwrap());
            }
            delivered
        });

        for payload in payloads {
            sender.send(payload).await.unwrap();
        }

        let delivered = recv_task.await.unwrap();
        let expected: Vec<Vec<u8>> = (0..10).map(|i| format!("m{i}").into_bytes()).collect();
        assert_eq!(delivered, expected);
    }

    #[test]
    fn rejects_window_too_large_for_seq_space() {
        let bad = Config {
            seq_bits: 2,
            window: 4,
            ..config()
        };
        assert!(bad.validate().is_err());
    }
}
