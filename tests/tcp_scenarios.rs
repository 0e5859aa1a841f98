//! Simplified TCP end-to-end scenarios: handshake recovery, bulk
//! transfer under loss, and graceful teardown, all driven through the
//! same public API an application would use -- a dialed [`Connection`]
//! on one side, a [`Listener`] on the other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use rdt::channel::port::{Network, PortChannel};
use rdt::channel::simulator::{Config as SimConfig, Simulator};
use rdt::channel::Channel;
use rdt::codec::{self, Kind};
use rdt::error::Error;
use rdt::protocols::tcp::{Config, Connection, Listener};
use rdt::Endpoint;

fn fast_config() -> Config {
    Config {
        mss: 64,
        initial_rto: Duration::from_millis(20),
        min_rto: Duration::from_millis(10),
        msl: Duration::from_millis(5),
        ..Config::default()
    }
}

/// Adapts a single bound [`MemoryPort`] into a [`Channel`] talking to
/// exactly one remote -- what a dialing client needs, as opposed to a
/// [`Listener`]'s multi-peer demultiplexing.
struct SingleRemoteChannel<P> {
    port: P,
    remote: Endpoint,
}

#[async_trait]
impl<P: PortChannel> Channel for SingleRemoteChannel<P> {
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

/// Drops exactly the first SYN it ever sees, then passes everything
/// through untouched -- including the SYN's own retransmissions.
struct DropFirstSyn<C> {
    inner: C,
    dropped_one: AtomicBool,
}

#[async_trait]
impl<C: Channel> Channel for DropFirstSyn<C> {
    async fn send(&self, frame: Vec<u8>) -> Result<(), Error> {
        if let Ok(packet) = codec::decode(&frame) {
            if packet.kind == Kind::Syn && !self.dropped_one.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }
        self.inner.send(frame).await
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
        self.inner.recv(timeout).await
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// A [`PortChannel`] wrapper that drops outbound frames independently
/// at `p_loss`, the same knob [`Simulator`] applies at the
/// single-peer [`Channel`] layer, generalized to a [`Listener`]'s
/// shared port.
struct LossyPort<P> {
    inner: P,
    p_loss: f64,
    rng: Mutex<SmallRng>,
}

impl<P> LossyPort<P> {
    fn new(inner: P, p_loss: f64, seed: u64) -> Self {
        Self {
            inner,
            p_loss,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl<P: PortChannel> PortChannel for LossyPort<P> {
    async fn send_to(&self, frame: Vec<u8>, to: Endpoint) -> Result<(), Error> {
        let dropped = self.rng.lock().unwrap().gen_bool(self.p_loss);
        if dropped {
            return Ok(());
        }
        self.inner.send_to(frame, to).await
    }

    async fn recv_from(&self, timeout: Duration) -> Result<(Vec<u8>, Endpoint), Error> {
        self.inner.recv_from(timeout).await
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[tracing_test::traced_test]
#[tokio::test]
async fn handshake_recovers_from_a_lost_first_syn() {
    let network = Network::new();
    let server_addr: Endpoint = "127.0.0.1:17000".parse().unwrap();
    let client_addr: Endpoint = "127.0.0.1:17001".parse().unwrap();
    let cfg = fast_config();

    let server_port = network.bind(server_addr);
    let listener = Listener::bind(server_addr, server_port, cfg);

    let client_channel = DropFirstSyn {
        inner: SingleRemoteChannel {
            port: network.bind(client_addr),
            remote: server_addr,
        },
        dropped_one: AtomicBool::new(false),
    };

    let (client, server) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            Connection::connect(client_addr, server_addr, client_channel, cfg),
            listener.accept(),
        )
    })
    .await
    .expect("handshake never completed after the first SYN was dropped");

    let client = client.unwrap();
    let server = server.unwrap();
    assert_eq!(client.endpoints().remote, server_addr);
    assert_eq!(server.endpoints().remote, client_addr);
    assert!(
        logs_contain("RTO fired, retransmitting"),
        "expected the dropped SYN to force at least one retransmission"
    );
}

#[tracing_test::traced_test]
#[tokio::test]
async fn bulk_transfer_survives_loss_and_triggers_fast_retransmit() {
    let network = Network::new();
    let server_addr: Endpoint = "127.0.0.1:17100".parse().unwrap();
    let client_addr: Endpoint = "127.0.0.1:17101".parse().unwrap();
    let mut cfg = fast_config();
    cfg.max_retransmits = 30;

    let server_port = LossyPort::new(network.bind(server_addr), 0.1, 0xFEED);
    let listener = Listener::bind(server_addr, server_port, cfg);

    let client_channel = Simulator::new(
        SingleRemoteChannel {
            port: network.bind(client_addr),
            remote: server_addr,
        },
        SimConfig {
            p_loss: 0.1,
            seed: 0xFEED + 1,
            ..SimConfig::default()
        },
    );

    let (client, server) = tokio::join!(
        Connection::connect(client_addr, server_addr, client_channel, cfg),
        listener.accept(),
    );
    let client = client.unwrap();
    let server = server.unwrap();

    let payload = vec![0x5Au8; 100 * 1024];
    let to_send = payload.clone();
    let sender = tokio::spawn(async move {
        let mut sent = 0;
        while sent < to_send.len() {
            sent += client.send(to_send[sent..].to_vec()).await.unwrap();
        }
        client
    });

    let mut received = Vec::new();
    while received.len() < payload.len() {
        let chunk = tokio::time::timeout(Duration::from_secs(30), server.recv(64 * 1024))
            .await
            .expect("bulk transfer stalled under loss")
            .unwrap();
        received.extend(chunk);
    }

    let _client = sender.await.unwrap();
    assert_eq!(received, payload);
    assert!(
        logs_contain("fast retransmit"),
        "expected at least one fast retransmit over a 100 KB transfer at 10% loss"
    );
}

#[tokio::test]
async fn graceful_close_reaches_closed_on_both_sides_end_to_end() {
    let network = Network::new();
    let server_addr: Endpoint = "127.0.0.1:17200".parse().unwrap();
    let client_addr: Endpoint = "127.0.0.1:17201".parse().unwrap();
    let cfg = fast_config();

    let server_port = network.bind(server_addr);
    let listener = Listener::bind(server_addr, server_port, cfg);
    let client_channel = SingleRemoteChannel {
        port: network.bind(client_addr),
        remote: server_addr,
    };

    let (client, server) = tokio::join!(
        Connection::connect(client_addr, server_addr, client_channel, cfg),
        listener.accept(),
    );
    let client = client.unwrap();
    let server = server.unwrap();

    let (client_result, server_result) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(2), client.close()),
        tokio::time::timeout(Duration::from_secs(2), server.close()),
    );
    assert!(client_result.unwrap().is_ok(), "active closer never reached CLOSED");
    assert!(server_result.unwrap().is_ok(), "passive closer never reached CLOSED");
}
