//! An in-memory [`Channel`] pair, for unit tests and as the transport
//! the [`simulator`](super::simulator) wraps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};

use super::Channel;
use crate::error::Error;

/// One end of an in-memory channel pair created by [`pair`].
pub struct MemoryChannel {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

/// Creates two connected channel endpoints: frames sent on one are
/// received on the other.
pub fn pair() -> (MemoryChannel, MemoryChannel) {
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();

    let a = MemoryChannel {
        sender: tx_ab,
        receiver: Mutex::new(rx_ba),
        closed: Arc::new(AtomicBool::new(false)),
        notify: Arc::new(Notify::new()),
    };
    let b = MemoryChannel {
        sender: tx_ba,
        receiver: Mutex::new(rx_ab),
        closed: Arc::new(AtomicBool::new(false)),
        notify: Arc::new(Notify::new()),
    };
    (a, b)
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, frame: Vec<u8>) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.sender
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            _ = self.notify.notified() => Err(Error::ConnectionClosed),
            frame = receiver.recv() => frame.ok_or(Error::ConnectionClosed),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (a, b) = pair();
        a.send(vec![1]).await.unwrap();
        a.send(vec![2]).await.unwrap();
        assert_eq!(b.recv(Duration::from_secs(1)).await.unwrap(), vec![1]);
        assert_eq!(b.recv(Duration::from_secs(1)).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn recv_times_out_with_nothing_sent() {
        let (_a, b) = pair();
        assert_eq!(
            b.recv(Duration::from_millis(10)).await,
            Err(Error::Timeout)
        );
    }

    #[tokio::test]
    async fn close_wakes_pending_recv() {
        let (a, _b) = pair();
        let a = Arc::new(a);
        let waiter = tokio::spawn({
            let a = a.clone();
            async move { a.recv(Duration::from_secs(5)).await }
        });
        tokio::task::yield_now().await;
        a.close();
        assert_eq!(waiter.await.unwrap(), Err(Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (a, _b) = pair();
        a.close();
        assert_eq!(a.send(vec![1]).await, Err(Error::ConnectionClosed));
    }
}
