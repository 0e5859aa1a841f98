use tracing::warn;

use super::Variant;
use crate::channel::Channel;
use crate::codec::{self, Kind, Packet};
use crate::error::Error;
use crate::logging::TARGET_STATE;
use crate::shutdown::CloseSignal;

/// The receiving half of the stop-and-wait family.
pub struct Receiver<C> {
    channel: C,
    variant: Variant,
    expected_seq: u8,
    close: CloseSignal,
}

impl<C> Receiver<C>
where
    C: Channel,
{
    pub fn new(channel: C, variant: Variant) -> Self {
        Self {
            channel,
            variant,
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

    /// Returns the next delivered message.
    ///
    /// Under rdt2.0 (no sequence number, per the resolved open
    /// question) a retransmission the sender issued after a corrupted
    /// ACK is delivered again — there is no way for this receiver to
    /// recognize it as a duplicate. rdt2.1/3.0 use the sequence bit to
    /// avoid this.
    pub async fn recv(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.close.closed() => return Err(Error::ConnectionClosed),
                frame = self.channel.recv(std::time::Duration::from_secs(3600)) => frame?,
            };

            match codec::decode(&frame) {
                Err(_) => {
                    warn!(target: TARGET_STATE, "corrupted DATA received");
                    self.reject().await?;
                }
                Ok(packet) if packet.kind == Kind::Data => {
                    let accept = if self.variant.uses_sequence() {
                        packet.seq == self.expected_seq as u32
                    } else {
                        true
                    };
                    if accept {
                        self.accept(packet.seq).await?;
                        if self.variant.uses_sequence() {
                            self.expected_seq ^= 1;
                        }
                        return Ok(packet.payload);
                    } else {
                        self.reject().await?;
                    }
                }
                Ok(_) => {
                    // Any other kind arriving at a data receiver is
                    // impossible given the stop-and-wait protocol;
                    // drop it silently per the error propagation policy.
                }
            }
        }
    }

    async fn accept(&mut self, seq: u32) -> Result<(), Error> {
        if self.variant == Variant::Rdt20 {
            let ack = Packet::control(Kind::Ack, 0, 0);
            self.channel.send(codec::encode(&ack)).await
        } else {
            let ack = Packet::control(Kind::Ack, 0, seq);
            self.channel.send(codec::encode(&ack)).await
        }
    }

    /// Re-signals the last correctly received sequence. Under rdt2.0
    /// this is an explicit NAK; rdt2.1/3.0 eliminate NAK and instead
    /// re-ACK the previously delivered sequence number.
    async fn reject(&mut self) -> Result<(), Error> {
        match self.variant {
            Variant::Rdt20 => {
                let nak = Packet::control(Kind::Nak, 0, 0);
                self.channel.send(codec::encode(&nak)).await
            }
            _ => {
                let previous = self.expected_seq ^ 1;
                let ack = Packet::control(Kind::Ack, 0, previous as u32);
                self.channel.send(codec::encode(&ack)).await
            }
        }
    }
}
