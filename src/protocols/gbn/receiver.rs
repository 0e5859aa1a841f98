use tracing::warn;

use super::Config;
use crate::channel::Channel;
use crate::codec::{self, Kind, Packet};
use crate::error::Error;
use crate::logging::TARGET_STATE;
use crate::seqnum::add_mod;
use crate::shutdown::CloseSignal;

/// The Go-Back-N receiver: in-order only, discarding anything out of
/// sequence and re-ACKing the last correctly received segment.
pub struct Receiver<C> {
    channel: C,
    config: Config,
    expected_seq: u32,
    close: CloseSignal,
}

impl<C> Receiver<C>
where
    C: Channel,
{
    pub fn new(channel: C, config: Config) -> Self {
        Self {
            channel,
            config,
            expected_seq: 0,
            close: CloseSignal::new(),
        }
    }

    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }

    pub fn close(&self) {
        self.close.close();
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, Error> {
        let modulus = self.config.modulus();
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.close.closed() => return Err(Error::ConnectionClosed),
                frame = self.channel.recv(std::time::Duration::from_secs(3600)) => frame?,
            };

            let packet = match codec::decode(&frame) {
                Ok(packet) => packet,
                Err(_) => {
                    warn!(target: TARGET_STATE, "corrupted DATA, re-ACKing last good seq");
                    self.reack().await?;
                    continue;
                }
            };
            if packet.kind != Kind::Data {
                continue;
            }
            if packet.seq == self.expected_seq {
                let ack = Packet::control(Kind::Ack, 0, self.expected_seq);
                self.channel.send(codec::encode(&ack)).await?;
                self.expected_seq = add_mod(self.expected_seq, 1, modulus);
                return Ok(packet.payload);
            } else {
                self.reack().await?;
            }
        }
    }

    async fn reack(&mut self) -> Result<(), Error> {
        let modulus = self.config.modulus();
        let last_good = (self.expected_seq + modulus - 1) % modulus;
        let ack = Packet::control(Kind::Ack, 0, last_good);
        self.channel.send(codec::encode(&ack)).await
    }
}
