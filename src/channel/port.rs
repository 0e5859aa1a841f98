//! An endpoint-aware datagram port, for the one protocol in this crate
//! that must demultiplex traffic from more than one peer on a single
//! local address: the simplified TCP's `Listener`.
//!
//! Every other protocol here is handed a [`Channel`](super::Channel)
//! already bound to its one peer, matching how a stop-and-wait,
//! Go-Back-N, or Selective Repeat endpoint is specified — one sender,
//! one receiver, one link. TCP's passive side is different: a single
//! `LISTEN`ing port accepts connections from any number of remote
//! endpoints, so its channel must additionally report *who* a frame
//! came from and accept a destination for each send. This trait adds
//! exactly that, and [`MemoryPort`] is the in-memory substrate the
//! rest of this crate already uses for tests, generalized to a small
//! shared switch of ports instead of a single fixed pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::endpoint::Endpoint;
use crate::error::Error;

/// A datagram port that can send to, and receive from, any endpoint
/// reachable on the same underlying substrate.
#[async_trait]
pub trait PortChannel: Send + Sync {
    /// Sends a single frame to `to`. As with [`Channel`](super::Channel),
    /// only a closed port is reported as an error; silent drops are a
    /// property of the substrate, not a failure of this call.
    async fn send_to(&self, frame: Vec<u8>, to: Endpoint) -> Result<(), Error>;

    /// Waits for the next frame addressed to this port's local
    /// endpoint, returning it along with the endpoint it arrived from.
    async fn recv_from(&self, timeout: Duration) -> Result<(Vec<u8>, Endpoint), Error>;

    /// Closes the port. Outstanding and future `recv_from` calls return
    /// [`Error::ConnectionClosed`].
    fn close(&self);
}

struct Mailbox {
    sender: mpsc::UnboundedSender<(Vec<u8>, Endpoint)>,
}

/// A shared in-memory switch: every [`MemoryPort`] bound to it can send
/// to, and receive frames from, every other port on the same switch by
/// local endpoint, the way a LAN segment connects any number of hosts
/// without requiring them to be introduced to each other pairwise.
#[derive(Clone, Default)]
pub struct Network {
    mailboxes: Arc<Mutex<HashMap<Endpoint, Mailbox>>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a new port to `local` on this switch. Panics if `local` is
    /// already bound, mirroring a real "address in use" failure.
    pub fn bind(&self, local: Endpoint) -> MemoryPort {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut mailboxes = self.mailboxes.lock().unwrap();
        assert!(
            mailboxes
                .insert(local, Mailbox { sender })
                .is_none(),
            "address {local} already bound on this network"
        );
        MemoryPort {
            network: self.clone(),
            local,
            receiver: Mutex::new(receiver),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

/// One port bound to a [`Network`]: a local endpoint plus the inbox of
/// frames addressed to it.
pub struct MemoryPort {
    network: Network,
    local: Endpoint,
    receiver: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Endpoint)>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        self.network.mailboxes.lock().unwrap().remove(&self.local);
    }
}

#[async_trait]
impl PortChannel for MemoryPort {
    async fn send_to(&self, frame: Vec<u8>, to: Endpoint) -> Result<(), Error> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mailboxes = self.network.mailboxes.lock().unwrap();
        if let Some(mailbox) = mailboxes.get(&to) {
            // A real switch would not notice a full or gone receiver as
            // anything but a silently dropped frame; only this port's
            // own closedness is ever an error.
            let _ = mailbox.sender.send((frame, self.local));
        }
        Ok(())
    }

    async fn recv_from(&self, timeout: Duration) -> Result<(Vec<u8>, Endpoint), Error> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            frame = receiver.recv() => frame.ok_or(Error::ConnectionClosed),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
        }
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_the_addressed_port() {
        let network = Network::new();
        let a: Endpoint = "127.0.0.1:9000".parse().unwrap();
        let b: Endpoint = "127.0.0.1:9001".parse().unwrap();
        let port_a = network.bind(a);
        let port_b = network.bind(b);

        port_a.send_to(b"hello".to_vec(), b).await.unwrap();
        let (frame, from) = port_b.recv_from(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame, b"hello");
        assert_eq!(from, a);
    }

    #[tokio::test]
    async fn send_to_unbound_address_is_silently_dropped() {
        let network = Network::new();
        let a: Endpoint = "127.0.0.1:9100".parse().unwrap();
        let ghost: Endpoint = "127.0.0.1:9999".parse().unwrap();
        let port_a = network.bind(a);
        port_a.send_to(b"nobody home".to_vec(), ghost).await.unwrap();
    }

    #[tokio::test]
    async fn a_third_port_can_reach_either_of_the_first_two() {
        let network = Network::new();
        let a: Endpoint = "127.0.0.1:9200".parse().unwrap();
        let b: Endpoint = "127.0.0.1:9201".parse().unwrap();
        let c: Endpoint = "127.0.0.1:9202".parse().unwrap();
        let port_a = network.bind(a);
        let port_b = network.bind(b);
        let port_c = network.bind(c);

        port_c.send_to(b"to a".to_vec(), a).await.unwrap();
        port_c.send_to(b"to b".to_vec(), b).await.unwrap();
        assert_eq!(
            port_a.recv_from(Duration::from_secs(1)).await.unwrap().0,
            b"to a"
        );
        assert_eq!(
            port_b.recv_from(Duration::from_secs(1)).await.unwrap().0,
            b"to b"
        );
    }
}
