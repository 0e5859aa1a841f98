//! A [`Channel`] wrapper that injects loss, corruption, duplication,
//! reordering, and delay, so the protocols in this crate can be tested
//! against the failure modes they are built to survive instead of only
//! against a perfect loopback.
//!
//! Built on a seeded [`SmallRng`] gating delivery with `gen_bool` for
//! loss, and injecting delivery delay with a detached `tokio::time::sleep`
//! task so one slow send never blocks the next. This module combines
//! both techniques under a single seeded RNG and adds the corruption,
//! duplication, and reordering knobs a bare unreliable/latent network
//! pair wouldn't need on its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::Channel;
use crate::error::Error;

/// Probabilities and delay bounds for a [`Simulator`].
///
/// All probabilities are independent and in `[0.0, 1.0]`; a dropped
/// frame is checked first and short-circuits the rest.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub p_loss: f64,
    pub p_corrupt: f64,
    pub p_duplicate: f64,
    pub p_reorder: f64,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub seed: u64,
}

impl Default for Config {
    /// A perfectly reliable, zero-delay channel. Flip individual knobs
    /// on to build up a specific failure scenario.
    fn default() -> Self {
        Self {
            p_loss: 0.0,
            p_corrupt: 0.0,
            p_duplicate: 0.0,
            p_reorder: 0.0,
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            seed: 0xBAD5EED,
        }
    }
}

/// Wraps an inner [`Channel`], applying [`Config`] to every outbound
/// frame. Inbound frames (`recv`) pass through unchanged; the
/// simulator only needs to sit in front of the sending side for both
/// ends of a pair to experience the same unreliable link.
pub struct Simulator<C> {
    inner: Arc<C>,
    config: Config,
    rng: Mutex<SmallRng>,
}

impl<C> Simulator<C>
where
    C: Channel + 'static,
{
    pub fn new(inner: C, config: Config) -> Self {
        Self {
            inner: Arc::new(inner),
            rng: Mutex::new(SmallRng::seed_from_u64(config.seed)),
            config,
        }
    }

    fn delay(&self) -> Duration {
        let mut rng = self.rng.lock().unwrap();
        if self.config.delay_max <= self.config.delay_min {
            self.config.delay_min
        } else {
            let range = self.config.delay_max - self.config.delay_min;
            self.config.delay_min + range.mul_f64(rng.gen::<f64>())
        }
    }

    fn corrupt(&self, frame: &mut [u8]) {
        if frame.is_empty() {
            return;
        }
        let mut rng = self.rng.lock().unwrap();
        let byte = rng.gen_range(0..frame.len());
        let bit = 1u8 << rng.gen_range(0..8);
        frame[byte] ^= bit;
    }
}

#[async_trait]
impl<C> Channel for Simulator<C>
where
    C: Channel + 'static,
{
    async fn send(&self, mut frame: Vec<u8>) -> Result<(), Error> {
        let (dropped, corrupted, duplicated, reordered) = {
            let mut rng = self.rng.lock().unwrap();
            (
                rng.gen_bool(self.config.p_loss),
                rng.gen_bool(self.config.p_corrupt),
                rng.gen_bool(self.config.p_duplicate),
                rng.gen_bool(self.config.p_reorder),
            )
        };

        if dropped {
            tracing::debug!(target: crate::logging::TARGET_PACKET, "simulator dropped a frame");
            return Ok(());
        }
        if corrupted {
            self.corrupt(&mut frame);
        }

        let mut base_delay = self.delay();
        if reordered {
            // Push this frame behind whatever gets sent next, rather than
            // explicitly swapping a held frame -- a slow send simply
            // overtakes a faster one.
            base_delay += self.config.delay_max.max(Duration::from_millis(1));
        }

        self.send_delayed(frame.clone(), base_delay);
        if duplicated {
            self.send_delayed(frame, base_delay + Duration::from_millis(1));
        }
        Ok(())
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
        self.inner.recv(timeout).await
    }

    fn close(&self) {
        self.inner.close();
    }
}

impl<C> Simulator<C>
where
    C: Channel + 'static,
{
    fn send_delayed(&self, frame: Vec<u8>, delay: Duration) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = inner.send(frame).await;
        });
    }
}
