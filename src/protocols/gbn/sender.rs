use std::collections::VecDeque;
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

/// Handle to a Go-Back-N sender. The actual state machine runs in a
/// background task so it can process ACKs and timer expiry while
/// `send` is blocked waiting for window room, matching the
/// single-threaded-event-loop-per-endpoint model: application requests
/// arrive through `requests`, datagrams and timer expiry are handled
/// entirely inside [`run`].
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

    /// Blocks until `payload` has been accepted into the send window
    /// (not until it has been acknowledged).
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
    let mut unacked: VecDeque<(u32, Vec<u8>)> = VecDeque::new();
    let mut timers: Timers<()> = Timers::new();
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
                if base == next_seq {
                    timers.start((), config.timeout);
                }
                next_seq = add_mod(next_seq, 1, modulus);
                unacked.push_back((seq, request.payload));
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
            _ = timers.next_expired() => {
                warn!(target: TARGET_STATE, base, next_seq, "GBN timer expired, resending window");
                for (seq, payload) in unacked.iter() {
                    let packet = Packet::new(Kind::Data, *seq, 0, 0, payload.clone());
                    let _ = channel.send(codec::encode(&packet)).await;
                }
                if !unacked.is_empty() {
                    timers.start((), config.timeout);
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
                if ack.kind != Kind::Ack {
                    continue;
                }
                // Cumulative: ACK[n] covers every outstanding segment
                // with seq in [base, n].
                advance_base(&mut base, &mut unacked, ack.ack, modulus);
                if base == next_seq {
                    timers.cancel(&());
                } else {
                    timers.start((), config.timeout);
                }
            }
        }
    }
}

/// Advances `base` past every outstanding segment up to and including
/// `n`, the cumulative ACK value. A duplicate or otherwise stale ACK
/// (one that does not match any currently outstanding segment) is
/// ignored rather than trusted, so it can never drain the window past
/// what was actually acknowledged.
fn advance_base(base: &mut u32, unacked: &mut VecDeque<(u32, Vec<u8>)>, n: u32, modulus: u32) {
    let covers = unacked.iter().position(|(seq, _)| *seq == n);
    let Some(covers) = covers else { return };
    for _ in 0..=covers {
        unacked.pop_front();
    }
    *base = add_mod(n, 1, modulus);
}
