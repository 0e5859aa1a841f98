use std::collections::{HashMap, VecDeque};

use tracing::warn;

use super::Config;
use crate::channel::Channel;
use crate::codec::{self, Kind, Packet};
use crate::error::Error;
use crate::logging::TARGET_STATE;
use crate::seqnum::{add_mod, in_window};
use crate::shutdown::CloseSignal;

/// The Selective Repeat receiver: buffers out-of-order segments within
/// the window and delivers runs of contiguous segments as they
/// complete.
pub struct Receiver<C> {
    channel: C,
    config: Config,
    rcv_base: u32,
    buffer: HashMap<u32, Vec<u8>>,
    deliverable: VecDeque<Vec<u8>>,
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
            rcv_base: 0,
            buffer: HashMap::new(),
            deliverable: VecDeque::new(),
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
            if let Some(payload) = self.deliverable.pop_front() {
                return Ok(payload);
            }

            let frame = tokio::select! {
                biased;
                _ = self.close.closed() => return Err(Error::ConnectionClosed),
                frame = self.channel.recv(std::time::Duration::from_secs(3600)) => frame?,
            };

            let packet = match codec::decode(&frame) {
                Ok(packet) => packet,
                Err(_) => {
                    warn!(target: TARGET_STATE, "corrupted DATA, dropping");
                    continue;
                }
            };
            if packet.kind != Kind::Data {
                continue;
            }

            let n = packet.seq;
            if in_window(n, self.rcv_base, self.config.window, modulus) {
                let ack = Packet::control(Kind::Ack, 0, n);
                self.channel.send(codec::encode(&ack)).await?;
                self.buffer.entry(n).or_insert(packet.payload);
                if n == self.rcv_base {
                    while let Some(payload) = self.buffer.remove(&self.rcv_base) {
                        self.deliverable.push_back(payload);
                        self.rcv_base = add_mod(self.rcv_base, 1, modulus);
                    }
                }
            } else {
                let previous_window_start =
                    add_mod(self.rcv_base, modulus - self.config.window, modulus);
                if in_window(n, previous_window_start, self.config.window, modulus) {
                    // Already delivered in an earlier window; re-ACK so
                    // the sender can still advance, but never redeliver.
                    let ack = Packet::control(Kind::Ack, 0, n);
                    self.channel.send(codec::encode(&ack)).await?;
                }
            }
        }
    }
}
