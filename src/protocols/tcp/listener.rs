//! Passive-open demultiplexing: one bound [`PortChannel`] fielding SYNs
//! from any number of remote endpoints, handing each newly established
//! connection to whoever is waiting in [`Listener::accept`].
//!
//! Every other protocol in this crate (and [`Connection`]'s active-open
//! path) is handed a [`Channel`] already bound to its one peer — one
//! sender, one receiver, one link. A `LISTEN`ing socket is the one
//! place that isn't true: a single local endpoint must accept
//! connections from any number of remotes, so this module sits in
//! front of a [`PortChannel`] and fans its frames out to a per-remote
//! [`PeerChannel`], then drives the accepted [`Tcb`] through the exact
//! same [`Connection`] event loop an active-open connection uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use super::connection::Connection;
use super::tcb::Tcb;
use super::{Config, Endpoints};
use crate::channel::port::PortChannel;
use crate::channel::Channel;
use crate::codec::{self, Kind};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::logging::TARGET_STATE;
use crate::shutdown::CloseSignal;

/// One remote peer's share of a shared [`PortChannel`], adapted to the
/// plain [`Channel`] interface every protocol's event loop (including
/// [`Connection`]'s) is generic over. Outbound frames are addressed to
/// `remote`; inbound frames are whatever the listener's demultiplexing
/// loop routed into `inbox` after reading them off the shared port.
struct PeerChannel<P> {
    port: Arc<P>,
    remote: Endpoint,
    inbox: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl<P> Channel for PeerChannel<P>
where
    P: PortChannel + 'static,
{
    async fn send(&self, frame: Vec<u8>) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.port.send_to(frame, self.remote).await
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            biased;
            frame = inbox.recv() => frame.ok_or(Error::ConnectionClosed),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A table of remote endpoints to the inbox each has a [`PeerChannel`]
/// draining, shared between the listener's `recv_from` loop (which
/// fills it as SYNs arrive) and the handshake-completion handler (which
/// drops the entry if the attempt never reaches ESTABLISHED, so a
/// half-open attempt doesn't permanently claim its remote address).
type DemuxTable = Arc<StdMutex<HashMap<Endpoint, mpsc::UnboundedSender<Vec<u8>>>>>;

/// A connection in the middle of its passive-open handshake: kept here,
/// keyed by remote endpoint, until [`Tcb`]'s ESTABLISHED signal resolves
/// one way or the other.
type PendingTable = Arc<StdMutex<HashMap<Endpoint, Connection>>>;

/// A passively opened TCP socket: binds one local endpoint and accepts
/// connections from any number of remote peers.
pub struct Listener {
    local: Endpoint,
    accept_rx: Mutex<mpsc::UnboundedReceiver<Connection>>,
    close: CloseSignal,
}

impl Listener {
    /// Binds `local` on `port` and begins accepting connections.
    pub fn bind<P>(local: Endpoint, port: P, config: Config) -> Self
    where
        P: PortChannel + 'static,
    {
        let port = Arc::new(port);
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let close = CloseSignal::new();
        tokio::spawn(run(local, port, config, accept_tx, close.clone()));
        Self {
            local,
            accept_rx: Mutex::new(accept_rx),
            close,
        }
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }

    pub fn close(&self) {
        self.close.close();
    }

    /// Waits for the next connection to complete its handshake and
    /// reach ESTABLISHED.
    pub async fn accept(&self) -> Result<Connection, Error> {
        let mut accept_rx = self.accept_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.close.closed() => Err(Error::ConnectionClosed),
            connection = accept_rx.recv() => connection.ok_or(Error::ConnectionClosed),
        }
    }
}

async fn run<P>(
    local: Endpoint,
    port: Arc<P>,
    config: Config,
    accept_tx: mpsc::UnboundedSender<Connection>,
    close: CloseSignal,
) where
    P: PortChannel + 'static,
{
    let demux: DemuxTable = Arc::new(StdMutex::new(HashMap::new()));
    let pending: PendingTable = Arc::new(StdMutex::new(HashMap::new()));
    let mut handshakes: FuturesUnordered<
        std::pin::Pin<Box<dyn std::future::Future<Output = (Endpoint, Result<(), Error>)> + Send>>,
    > = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;
            _ = close.closed() => {
                port.close();
                return;
            }
            Some((remote, established)) = handshakes.next(), if !handshakes.is_empty() => {
                let Some(connection) = pending.lock().unwrap().remove(&remote) else { continue };
                match established {
                    Ok(()) => {
                        debug!(target: TARGET_STATE, remote = %remote, "connection established, handing to accept()");
                        let _ = accept_tx.send(connection);
                    }
                    Err(_) => {
                        warn!(target: TARGET_STATE, remote = %remote, "handshake never completed, dropping");
                        demux.lock().unwrap().remove(&remote);
                    }
                }
            }
            frame = port.recv_from(Duration::from_secs(3600)) => {
                let (frame, remote) = match frame {
                    Ok(pair) => pair,
                    Err(Error::Timeout) => continue,
                    Err(_) => return,
                };
                accept_syn_or_route(
                    local,
                    remote,
                    frame,
                    &port,
                    &config,
                    &demux,
                    &pending,
                    &mut handshakes,
                );
            }
        }
    }
}

type HandshakeFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = (Endpoint, Result<(), Error>)> + Send>>;

/// Routes a frame to its connection's inbox if one already exists;
/// otherwise, if it is a SYN from a new remote, spawns a [`Connection`]
/// for it and registers its handshake completion to be picked up by
/// `run`'s `handshakes` stream.
fn accept_syn_or_route<P>(
    local: Endpoint,
    remote: Endpoint,
    frame: Vec<u8>,
    port: &Arc<P>,
    config: &Config,
    demux: &DemuxTable,
    pending: &PendingTable,
    handshakes: &mut FuturesUnordered<HandshakeFuture>,
) where
    P: PortChannel + 'static,
{
    let existing = demux.lock().unwrap().get(&remote).cloned();
    if let Some(inbox) = existing {
        let _ = inbox.send(frame);
        return;
    }

    let packet = match codec::decode(&frame) {
        Ok(packet) => packet,
        Err(_) => {
            warn!(target: TARGET_STATE, "corrupted frame from unknown peer, dropping");
            return;
        }
    };
    if packet.kind != Kind::Syn {
        // Anything but a SYN from an endpoint this listener has no
        // connection for is impossible given the protocol; dropped
        // silently per the error propagation policy.
        return;
    }

    let endpoints = Endpoints { local, remote };
    let iss = rand::random::<u32>();
    let mut tcb = Tcb::listen(endpoints, iss, config);
    tcb.segment_arrives(packet);
    debug!(target: TARGET_STATE, remote = %remote, "SYN received, spawning connection");

    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    demux.lock().unwrap().insert(remote, inbox_tx);
    let channel = PeerChannel {
        port: port.clone(),
        remote,
        inbox: Mutex::new(inbox_rx),
        closed: Arc::new(AtomicBool::new(false)),
    };

    let (established_tx, established_rx) = oneshot::channel();
    let connection = Connection::spawn_accepted(endpoints, tcb, channel, *config, established_tx);
    pending.lock().unwrap().insert(remote, connection);
    handshakes.push(Box::pin(async move {
        let result = established_rx.await.unwrap_or(Err(Error::ConnectionClosed));
        (remote, result)
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::port::Network;

    fn config() -> Config {
        Config {
            mss: 8,
            msl: Duration::from_millis(5),
            ..Config::default()
        }
    }

    /// A [`Channel`] for a client talking to exactly one remote over a
    /// shared [`Network`] -- unlike [`PeerChannel`], it never needs to
    /// demultiplex, since it's the only thing bound to its own address.
    struct SingleRemoteChannel {
        port: Arc<dyn PortChannel>,
        remote: Endpoint,
    }

    #[async_trait]
    impl Channel for SingleRemoteChannel {
        async fn send(&self, frame: Vec<u8>) -> Result<(), Error> {
            self.port.send_to(frame, self.remote).await
        }

        async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
            self.port.recv_from(timeout).await.map(|(frame, _from)| frame)
        }

        fn close(&self) {
            self.port.close();
        }
    }

    #[tokio::test]
    async fn bind_accepts_a_connecting_client() {
        let network = Network::new();
        let server_addr: Endpoint = "127.0.0.1:16000".parse().unwrap();
        let client_addr: Endpoint = "127.0.0.1:16001".parse().unwrap();

        let server_port = network.bind(server_addr);
        let listener = Listener::bind(server_addr, server_port, config());
        let client_channel = SingleRemoteChannel {
            port: Arc::new(network.bind(client_addr)),
            remote: server_addr,
        };

        let (client, server) = tokio::join!(
            Connection::connect(client_addr, server_addr, client_channel, config()),
            listener.accept(),
        );
        let client = client.unwrap();
        let server = server.unwrap();
        assert_eq!(client.endpoints().remote, server_addr);
        assert_eq!(server.endpoints().remote, client_addr);
    }

    #[tokio::test]
    async fn accepts_multiple_remotes_without_cross_talk() {
        let network = Network::new();
        let server_addr: Endpoint = "127.0.0.1:16100".parse().unwrap();
        let client_a_addr: Endpoint = "127.0.0.1:16101".parse().unwrap();
        let client_b_addr: Endpoint = "127.0.0.1:16102".parse().unwrap();

        let server_port = network.bind(server_addr);
        let listener = Listener::bind(server_addr, server_port, config());

        let channel_a = SingleRemoteChannel {
            port: Arc::new(network.bind(client_a_addr)),
            remote: server_addr,
        };
        let channel_b = SingleRemoteChannel {
            port: Arc::new(network.bind(client_b_addr)),
            remote: server_addr,
        };

        let (client_a, client_b) = tokio::join!(
            Connection::connect(client_a_addr, server_addr, channel_a, config()),
            Connection::connect(client_b_addr, server_addr, channel_b, config()),
        );
        let client_a = client_a.unwrap();
        let client_b = client_b.unwrap();

        let first = listener.accept().await.unwrap();
        let second = listener.accept().await.unwrap();
        let (server_a, server_b) = if first.endpoints().remote == client_a_addr {
            (first, second)
        } else {
            (second, first)
        };

        client_a.send(b"from a".to_vec()).await.unwrap();
        client_b.send(b"from b".to_vec()).await.unwrap();

        let received_a = tokio::time::timeout(Duration::from_secs(1), server_a.recv(1024))
            .await
            .unwrap()
            .unwrap();
        let received_b = tokio::time::timeout(Duration::from_secs(1), server_b.recv(1024))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received_a, b"from a".to_vec());
        assert_eq!(received_b, b"from b".to_vec());
    }

    #[tokio::test]
    async fn closing_the_listener_fails_a_pending_accept() {
        let network = Network::new();
        let server_addr: Endpoint = "127.0.0.1:16200".parse().unwrap();
        let server_port = network.bind(server_addr);
        let listener = Listener::bind(server_addr, server_port, config());

        let accept_fut = listener.accept();
        let close_fut = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            listener.close();
        };
        let (accept_result, ()) = tokio::join!(accept_fut, close_fut);
        assert!(matches!(accept_result, Err(Error::ConnectionClosed)));
    }
}
