use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::Config;
use crate::channel::Channel;
use crate::codec::{self, Kind, Packet};
use crate::error::Error;
use crate::logging::TARGET_STATE;
use crate::seqnum::{add_mod, in_window};
use crate::shutdown::CloseSignal;
use crate::timer::Timers;

struct Request {
    payload: Vec<u8>,
    accepted: oneshot::Sender<Result<(), Error>>,
}

struct Slot {
    payload: Vec<u8>,
    acked: bool,
}

/// Handle to a Selective Repeat sender. As with [`gbn::Sender`](crate::protocols::gbn::Sender),
/// the state machine runs in a background task; `send` only waits for
/// window room, not for acknowledgment.
pub struct Sender {
    requests: mpsc::UnboundedSender<Request>,
    close: CloseSignal,
}

impl Sender {
    pub fn new<C>(channel: C, config: Config) -> Result<Self, Error>
    where
        C: Channel + Send + 'static,
    {
        config.validate()?;
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let close = CloseSignal::new();
        let worker_close = close.clone();
        tokio::spawn(run(channel, config, requests_rx, worker_close));
        Ok(Self {
            requests: requests_tx,
            close,
        })
    }

    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }

    pub fn close(&self) {
        self.close.close();
    }

    pub async fn send(&self, payload: Vec<u8>) -> Result<(), Error> {
        let (accepted, wait) = oneshot::channel();
        self.requests
            .send(Request { payload, accepted })
            .map_err(|_| Error::ConnectionClosed)?;
        wait.await.map_err(|_| Error::ConnectionClosed)?
    }
}

async fn run<C>(
    channel: C,
    config: Config,
    mut requests: mpsc::UnboundedReceiver<Request>,
    close: CloseSignal,
) where
    C: Channel,
{
    let modulus = config.modulus();
    let mut base = 0u32;
    let mut next_seq = 0u32;
    let mut slots: HashMap<u32, Slot> = HashMap::new();
    let mut timers: Timers<u32> = Timers::new();
    let mut pending: Option<Request> = None;

    loop {
        let window_has_room = in_window(next_seq, base, config.window, modulus);

        if pending.is_none() {
            if let Ok(request) = requests.try_recv() {
                pending = Some(request);
            }
        }

        if window_has_room {
            if let Some(request) = pending.take() {
                let seq = next_seq;
                let packet = Packet::new(Kind::Data, seq, 0, 0, request.payload.clone());
                if channel.send(codec::encode(&packet)).await.is_err() {
                    let _ = request.accepted.send(Err(Error::ConnectionClosed));
                    return;
                }
                slots.insert(
                    seq,
                    Slot {
                        payload: request.payload,
                        acked: false,
                    },
                );
                timers.start(seq, config.timeout);
                next_seq = add_mod(next_seq, 1, modulus);
                let _ = request.accepted.send(Ok(()));
                debug!(target: TARGET_STATE, seq, base, next_seq, "sent DATA");
                continue;
            }
        }

        tokio::select! {
            biased;
            _ = close.closed() => {
                if let Some(request) = pending.take() {
                    let _ = request.accepted.send(Err(Error::ConnectionClosed));
                }
                return;
            }
            request = requests.recv(), if pending.is_none() => {
                match request {
                    Some(request) => pending = Some(request),
                    None => return,
                }
            }
            Some(seq) = timers.next_expired() => {
                if let Some(slot) = slots.get(&seq) {
                    warn!(target: TARGET_STATE, seq, "SR slot timer expired, retransmitting");
                    let packet = Packet::new(Kind::Data, seq, 0, 0, slot.payload.clone());
                    let _ = channel.send(codec::encode(&packet)).await;
                    timers.start(seq, config.timeout);
                }
            }
            frame = channel.recv(Duration::from_secs(3600)) => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(Error::Timeout) => continue,
                    Err(_) => return,
                };
                let Ok(ack) = codec::decode(&frame) else {
                    warn!(target: TARGET_STATE, "corrupted ACK, ignoring");
                    continue;
                };
                if ack.kind != Kind::Ack || !in_window(ack.ack, base, config.window, modulus) {
                    continue;
                }
                let n = ack.ack;
                if let Some(slot) = slots.get_mut(&n) {
                    if !slot.acked {
                        slot.acked = true;
                        timers.cancel(&n);
                    }
                }
                if n == base {
                    while slots.get(&base).map(|slot| slot.acked).unwrap_or(false) {
                        slots.remove(&base);
                        base = add_mod(base, 1, modulus);
                    }
                }
            }
        }
    }
}
