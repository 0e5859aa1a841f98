//! Drives one [`Tcb`] from a single-threaded event loop, exactly like
//! [`gbn::Sender`](crate::protocols::gbn::Sender) and
//! [`sr::Sender`](crate::protocols::sr::Sender) drive their state
//! machines: the machine runs in a background task, and the
//! application-facing handle marshals calls to it through a bounded
//! request/response pair.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::tcb::{Outcome, Tcb};
use super::{Config, Endpoints};
use crate::channel::Channel;
use crate::codec::{self, Kind};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::logging::TARGET_STATE;
use super::rtt::RttEstimator;
use crate::protocols::tcp::State;
use crate::shutdown::CloseSignal;
use crate::timer::Timers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Retransmit,
    TimeWait,
}

enum Request {
    Send {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<usize, Error>>,
    },
    Recv {
        max: usize,
        reply: oneshot::Sender<Result<Vec<u8>, Error>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

/// A handle to one simplified TCP connection.
///
/// Cloning is not supported: a connection has exactly one application
/// owner, matching the crate-wide rule that a protocol instance
/// exclusively owns its channel, state, and timers.
pub struct Connection {
    requests: mpsc::UnboundedSender<Request>,
    close: CloseSignal,
    endpoints: Endpoints,
}

impl Connection {
    /// Active open: sends a SYN to `remote` over `channel` and returns
    /// once the connection reaches ESTABLISHED or the attempt fails.
    pub async fn connect<C>(
        local: Endpoint,
        remote: Endpoint,
        channel: C,
        config: Config,
    ) -> Result<Self, Error>
    where
        C: Channel + Send + 'static,
    {
        let endpoints = Endpoints { local, remote };
        let iss = rand::random::<u32>();
        let tcb = Tcb::connect(endpoints, iss, &config);
        Self::spawn(endpoints, tcb, channel, config, true).await
    }

    /// Spawns the event loop for `tcb` (already in `SYN_SENT` or
    /// `SYN_RECEIVED`) and waits for it to reach ESTABLISHED before
    /// returning, surfacing any failure along the way.
    async fn spawn<C>(
        endpoints: Endpoints,
        tcb: Tcb,
        channel: C,
        config: Config,
        wait_for_established: bool,
    ) -> Result<Self, Error>
    where
        C: Channel + Send + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let close = CloseSignal::new();
        let (established_tx, established_rx) = oneshot::channel();
        let established_tx = if wait_for_established {
            Some(established_tx)
        } else {
            None
        };

        tokio::spawn(run(
            channel,
            tcb,
            config,
            requests_rx,
            close.clone(),
            established_tx,
        ));

        let connection = Self {
            requests: requests_tx,
            close,
            endpoints,
        };

        if wait_for_established {
            established_rx
                .await
                .map_err(|_| Error::ConnectionClosed)??;
        }

        Ok(connection)
    }

    /// Spawns the event loop for a passively opened `tcb`, without
    /// blocking for ESTABLISHED — used by [`Listener`](super::Listener),
    /// which waits for establishment itself before handing the
    /// connection to `accept`'s caller.
    pub(super) fn spawn_accepted<C>(
        endpoints: Endpoints,
        tcb: Tcb,
        channel: C,
        config: Config,
        established_tx: oneshot::Sender<Result<(), Error>>,
    ) -> Self
    where
        C: Channel + Send + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let close = CloseSignal::new();
        tokio::spawn(run(
            channel,
            tcb,
            config,
            requests_rx,
            close.clone(),
            Some(established_tx),
        ));
        Self {
            requests: requests_tx,
            close,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }

    /// Queues bytes for transmission, blocking only long enough to be
    /// accepted into the send buffer, and returns how many bytes of
    /// `bytes` were accepted (fewer than `bytes.len()` if the buffer was
    /// nearly full).
    pub async fn send(&self, bytes: Vec<u8>) -> Result<usize, Error> {
        let (reply, wait) = oneshot::channel();
        self.requests
            .send(Request::Send { bytes, reply })
            .map_err(|_| Error::ConnectionClosed)?;
        wait.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Returns up to `max` bytes of in-order, delivered data, blocking
    /// until at least one byte is available or the connection closes.
    pub async fn recv(&self, max: usize) -> Result<Vec<u8>, Error> {
        let (reply, wait) = oneshot::channel();
        self.requests
            .send(Request::Recv { max, reply })
            .map_err(|_| Error::ConnectionClosed)?;
        wait.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Initiates a graceful close and waits for the connection to reach
    /// CLOSED.
    pub async fn close(&self) -> Result<(), Error> {
        let (reply, wait) = oneshot::channel();
        self.requests
            .send(Request::Close { reply })
            .map_err(|_| Error::ConnectionClosed)?;
        wait.await.map_err(|_| Error::ConnectionClosed)?
    }
}

async fn run<C>(
    channel: C,
    mut tcb: Tcb,
    config: Config,
    mut requests: mpsc::UnboundedReceiver<Request>,
    close: CloseSignal,
    mut established_tx: Option<oneshot::Sender<Result<(), Error>>>,
) where
    C: Channel,
{
    let mut timers: Timers<TimerKey> = Timers::new();
    let mut rtt = RttEstimator::new(config.initial_rto, config.min_rto, config.max_rto);
    let mut send_times: HashMap<u32, Instant> = HashMap::new();

    let mut pending_send: Option<(Vec<u8>, oneshot::Sender<Result<usize, Error>>)> = None;
    let mut pending_recv: Option<(usize, oneshot::Sender<Result<Vec<u8>, Error>>)> = None;
    let mut pending_close: Option<oneshot::Sender<Result<(), Error>>> = None;

    // The initial SYN (or SYN_ACK, for a passively opened Tcb) is
    // already queued by the caller; send it before waiting on anything.
    flush_outgoing(&channel, &mut tcb, &mut send_times).await;
    rearm_retransmit_timer(&tcb, &mut timers, &rtt);

    loop {
        if was_established(&tcb) {
            if let Some(tx) = established_tx.take() {
                let _ = tx.send(Ok(()));
            }
        }

        if tcb.send_window_has_room() {
            let formed = tcb.segmentize();
            if !formed.is_empty() {
                for packet in &formed {
                    send_times.insert(packet.seq, Instant::now());
                    let _ = channel.send(codec::encode(packet)).await;
                }
                rearm_retransmit_timer(&tcb, &mut timers, &rtt);
            }
        }

        if let Some((bytes, reply)) = pending_send.take() {
            let room = config.send_buffer_capacity.saturating_sub(tcb.send_buffer_len());
            if room == 0 {
                pending_send = Some((bytes, reply));
            } else {
                let accept = bytes.len().min(room);
                match tcb.queue_send(bytes[..accept].to_vec()) {
                    Ok(()) => {
                        let _ = reply.send(Ok(accept));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }

        if pending_recv.is_some() && tcb.has_received() {
            let (max, reply) = pending_recv.take().unwrap();
            let _ = reply.send(Ok(tcb.take_received(max)));
        } else if pending_recv.is_some() && !tcb.state().can_receive() {
            let (_, reply) = pending_recv.take().unwrap();
            let _ = reply.send(Err(Error::ConnectionClosed));
        }

        if tcb.is_closed() {
            if let Some(reply) = pending_close.take() {
                let _ = reply.send(Ok(()));
            }
            if let Some((_, reply)) = pending_recv.take() {
                let _ = reply.send(Err(Error::ConnectionClosed));
            }
            if let Some((_, reply)) = pending_send.take() {
                let _ = reply.send(Err(Error::ConnectionClosed));
            }
            if let Some(tx) = established_tx.take() {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
            return;
        }

        tokio::select! {
            biased;

            // `close_signal()` is the crate-wide hard-cancellation
            // primitive other protocols use too: it aborts immediately
            // rather than waiting out a graceful FIN exchange, which is
            // what `Connection::close`'s `Request::Close` path below
            // drives instead.
            _ = close.closed() => {
                tcb.abort();
            }

            request = requests.recv() => {
                match request {
                    None => {
                        tcb.abort();
                    }
                    Some(Request::Send { bytes, reply }) if pending_send.is_none() => {
                        pending_send = Some((bytes, reply));
                    }
                    Some(Request::Send { reply, .. }) => {
                        let _ = reply.send(Err(Error::WindowFull));
                    }
                    Some(Request::Recv { max, reply }) if pending_recv.is_none() => {
                        pending_recv = Some((max, reply));
                    }
                    Some(Request::Recv { reply, .. }) => {
                        let _ = reply.send(Err(Error::Protocol(
                            "a recv is already pending on this connection".to_string(),
                        )));
                    }
                    Some(Request::Close { reply }) => {
                        pending_close = Some(reply);
                        if tcb.close() {
                            flush_outgoing(&channel, &mut tcb, &mut send_times).await;
                            rearm_retransmit_timer(&tcb, &mut timers, &rtt);
                        }
                    }
                }
            }

            Some(key) = timers.next_expired() => {
                match key {
                    TimerKey::Retransmit => {
                        if tcb.retransmit_count() >= config.max_retransmits {
                            warn!(target: TARGET_STATE, "retransmission cap exceeded, resetting connection");
                            tcb.abort();
                            close.close_with_reason(crate::shutdown::CloseReason::Reset);
                        } else if let Some(packet) = tcb.retransmit_oldest() {
                            warn!(target: TARGET_STATE, seq = packet.seq, "RTO fired, retransmitting");
                            let _ = channel.send(codec::encode(&packet)).await;
                            rtt.backoff();
                            timers.start(TimerKey::Retransmit, rtt.rto());
                        }
                    }
                    TimerKey::TimeWait => {
                        tcb.time_wait_elapsed();
                    }
                }
            }

            frame = channel.recv(Duration::from_secs(3600)) => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(Error::Timeout) => continue,
                    Err(_) => { close.close(); continue; }
                };
                let packet = match codec::decode(&frame) {
                    Ok(packet) => packet,
                    Err(_) => {
                        warn!(target: TARGET_STATE, "corrupted segment, dropping");
                        continue;
                    }
                };
                let outcome = tcb.segment_arrives(packet);
                handle_outcome(&channel, &mut tcb, &config, &mut timers, &mut rtt, &mut send_times, outcome).await;
                flush_outgoing(&channel, &mut tcb, &mut send_times).await;
            }
        }
    }
}

async fn handle_outcome<C: Channel>(
    channel: &C,
    tcb: &mut Tcb,
    config: &Config,
    timers: &mut Timers<TimerKey>,
    rtt: &mut RttEstimator,
    send_times: &mut HashMap<u32, Instant>,
    outcome: Outcome,
) {
    for seq in outcome.acked_clean {
        if let Some(sent_at) = send_times.remove(&seq) {
            rtt.sample(sent_at.elapsed());
        }
    }

    if outcome.fast_retransmit && config.fast_retransmit {
        if let Some(packet) = tcb.retransmit_oldest() {
            debug!(target: TARGET_STATE, seq = packet.seq, "fast retransmit");
            let _ = channel.send(codec::encode(&packet)).await;
        }
    }

    if tcb.has_outstanding() {
        timers.start(TimerKey::Retransmit, rtt.rto());
    } else {
        timers.cancel(&TimerKey::Retransmit);
    }

    if outcome.enter_time_wait {
        timers.start(TimerKey::TimeWait, config.msl * 2);
    }
}

async fn flush_outgoing<C: Channel>(
    channel: &C,
    tcb: &mut Tcb,
    send_times: &mut HashMap<u32, Instant>,
) {
    for packet in tcb.take_outgoing() {
        if matches!(packet.kind, Kind::Syn | Kind::SynAck | Kind::Fin | Kind::FinAck | Kind::Data) {
            send_times.entry(packet.seq).or_insert_with(Instant::now);
        }
        let _ = channel.send(codec::encode(&packet)).await;
    }
}

fn rearm_retransmit_timer(tcb: &Tcb, timers: &mut Timers<TimerKey>, rtt: &RttEstimator) {
    if tcb.has_outstanding() {
        timers.start(TimerKey::Retransmit, rtt.rto());
    } else {
        timers.cancel(&TimerKey::Retransmit);
    }
}

fn was_established(tcb: &Tcb) -> bool {
    tcb.state() == State::Established
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory;

    fn config() -> Config {
        Config {
            mss: 8,
            msl: Duration::from_millis(5),
            ..Config::default()
        }
    }

    /// Active-opens a client against a passively opened server sharing
    /// an in-memory channel pair, returning both once ESTABLISHED.
    async fn connected_pair() -> (Connection, Connection) {
        let (chan_a, chan_b) = memory::pair();
        let local: Endpoint = "127.0.0.1:4000".parse().unwrap();
        let remote: Endpoint = "127.0.0.1:5000".parse().unwrap();
        let cfg = config();

        let server_endpoints = Endpoints {
            local: remote,
            remote: local,
        };
        let server_tcb = Tcb::listen(server_endpoints, 300, &cfg);
        let (established_tx, established_rx) = oneshot::channel();
        let server = Connection::spawn_accepted(server_endpoints, server_tcb, chan_b, cfg, established_tx);

        let client = tokio::spawn(Connection::connect(local, remote, chan_a, cfg));
        established_rx.await.unwrap().unwrap();
        let client = client.await.unwrap().unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn connect_reaches_established_on_both_ends() {
        let (client, server) = connected_pair().await;
        assert_eq!(client.endpoints().remote, server.endpoints().local);
        assert_eq!(client.endpoints().local, server.endpoints().remote);
    }

    #[tokio::test]
    async fn send_then_recv_round_trips_bytes() {
        let (client, server) = connected_pair().await;
        let sent = client.send(b"hello world".to_vec()).await.unwrap();
        assert_eq!(sent, 11);
        let received = tokio::time::timeout(Duration::from_secs(1), server.recv(1024))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"hello world".to_vec());
    }

    #[tokio::test]
    async fn send_larger_than_mss_still_arrives_whole() {
        let (client, server) = connected_pair().await;
        let payload = vec![0x42u8; 100];
        client.send(payload.clone()).await.unwrap();

        let mut received = Vec::new();
        while received.len() < payload.len() {
            let chunk = tokio::time::timeout(Duration::from_secs(1), server.recv(1024))
                .await
                .unwrap()
                .unwrap();
            received.extend(chunk);
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn graceful_close_reaches_closed_on_both_sides() {
        let (client, server) = connected_pair().await;
        let (client_result, server_result) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(1), client.close()),
            tokio::time::timeout(Duration::from_secs(1), server.close()),
        );
        assert!(client_result.unwrap().is_ok());
        assert!(server_result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn hard_close_signal_aborts_without_a_fin_exchange() {
        let (client, _server) = connected_pair().await;
        client.close_signal().close();
        // Give the event loop a chance to observe the signal and return.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            client.send(b"x".to_vec()).await,
            Err(Error::ConnectionClosed)
        );
    }
}
