use std::time::Duration;

use tracing::{debug, warn};

use super::Variant;
use crate::channel::Channel;
use crate::codec::{self, Kind, Packet};
use crate::error::Error;
use crate::logging::TARGET_STATE;
use crate::shutdown::CloseSignal;
use crate::timer::Timers;

/// How long to wait for a response before treating it as lost. Under
/// rdt2.0/2.1 this should never fire — both variants are specified
/// against a channel that corrupts but does not drop — but arming it
/// unconditionally means a misbehaving channel produces a retry
/// instead of an unbounded hang.
const WAIT_KEY: () = ();

/// The sending half of the stop-and-wait family.
///
/// One `Sender` is created per logical connection and exclusively owns
/// its [`Channel`]; `send` is not reentrant and must not be called
/// concurrently from two tasks (stop-and-wait has a window of exactly
/// one, so there is never a reason to).
pub struct Sender<C> {
    channel: C,
    variant: Variant,
    timeout: Duration,
    seq: u8,
    close: CloseSignal,
}

impl<C> Sender<C>
where
    C: Channel,
{
    pub fn new(channel: C, variant: Variant, timeout: Duration) -> Self {
        Self {
            channel,
            variant,
            timeout,
            seq: 0,
            close: CloseSignal::new(),
        }
    }

    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }

    pub fn close(&self) {
        self.close.close();
    }

    /// Sends one message reliably, retrying on corruption, NAK, or
    /// (rdt3.0) retransmission timeout, and returns once an
    /// unambiguous ACK for this message has been received.
    pub async fn send(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        if self.close.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let seq = if self.variant.uses_sequence() {
            self.seq as u32
        } else {
            0
        };
        let packet = Packet::new(Kind::Data, seq, 0, 0, payload);
        let mut timers = Timers::new();

        loop {
            self.channel.send(codec::encode(&packet)).await?;
            debug!(target: TARGET_STATE, seq, "sent DATA, awaiting response");
            timers.start(WAIT_KEY, self.timeout);

            tokio::select! {
                biased;
                _ = self.close.closed() => return Err(Error::ConnectionClosed),
                _ = timers.next_expired() => {
                    warn!(target: TARGET_STATE, seq, "response timed out, retransmitting");
                    continue;
                }
                frame = self.channel.recv(self.timeout) => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(Error::Timeout) => continue,
                        Err(other) => return Err(other),
                    };
                    match codec::decode(&frame) {
                        Err(_) => {
                            // Corrupted response. Under rdt2.0 this is
                            // indistinguishable from a NAK; under
                            // rdt2.1/3.0 it is indistinguishable from a
                            // stale ACK. Both cases call for the same
                            // action: resend.
                            warn!(target: TARGET_STATE, seq, "corrupted response, retransmitting");
                            continue;
                        }
                        Ok(response) if response.kind == Kind::Nak => {
                            continue;
                        }
                        Ok(response) if response.kind == Kind::Ack => {
                            if self.variant.uses_sequence() && response.ack != seq {
                                // A duplicate ACK for the previous
                                // message; our own send is still
                                // unacknowledged.
                                continue;
                            }
                            self.seq ^= 1;
                            return Ok(());
                        }
                        Ok(_) => continue,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory;

    #[tokio::test]
    async fn rdt20_retransmits_on_nak() {
        let (sender_channel, receiver_channel) = memory::pair();
        let mut sender = Sender::new(sender_channel, Variant::Rdt20, Duration::from_millis(200));

        let scripted = tokio::spawn(async move {
            let frame = receiver_channel.recv(Duration::from_secs(1)).await.unwrap();
            let data = codec::decode(&frame).unwrap();
            assert_eq!(data.kind, Kind::Data);
            // First response: NAK.
            let nak = Packet::control(Kind::Nak, 0, 0);
            receiver_channel.send(codec::encode(&nak)).await.unwrap();

            let frame = receiver_channel.recv(Duration::from_secs(1)).await.unwrap();
            let retransmit = codec::decode(&frame).unwrap();
            assert_eq!(retransmit.payload, data.payload);
            let ack = Packet::control(Kind::Ack, 0, 0);
            receiver_channel.send(codec::encode(&ack)).await.unwrap();
        });

        sender.send(b"hi".to_vec()).await.unwrap();
        scripted.await.unwrap();
    }
}
