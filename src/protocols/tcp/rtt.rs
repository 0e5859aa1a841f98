//! Round-trip time estimation and retransmission timeout, per the
//! Jacobson/Karn algorithm (RFC 6298): a small, single-purpose module
//! in the style of the rest of this crate, tracking SRTT/RTTVAR and
//! deriving RTO directly from the RFC rather than a fixed placeholder.

use std::time::Duration;

const ALPHA: f64 = 1.0 / 8.0;
const BETA: f64 = 1.0 / 4.0;

/// Tracks SRTT/RTTVAR and derives the current retransmission timeout.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    initial_rto: Duration,
}

impl RttEstimator {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: initial_rto,
            min_rto,
            max_rto,
            initial_rto,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Records a fresh RTT sample (never from a retransmitted segment,
    /// per Karn's rule -- the caller is responsible for only passing
    /// samples from `Outcome::acked_clean`).
    pub fn sample(&mut self, measured: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(measured);
                self.rttvar = measured / 2;
            }
            Some(srtt) => {
                let delta = abs_diff(srtt, measured);
                self.rttvar = duration_mul_add(self.rttvar, 1.0 - BETA, delta, BETA);
                self.srtt = Some(duration_mul_add(srtt, 1.0 - ALPHA, measured, ALPHA));
            }
        }
        let srtt = self.srtt.unwrap();
        let computed = srtt + self.rttvar.saturating_mul(4).max(Duration::from_millis(1));
        self.rto = computed.clamp(self.min_rto, self.max_rto);
    }

    /// Doubles the current RTO (exponential backoff) after a
    /// retransmission, until the next valid sample resets it.
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    /// Resets to the initial, sample-free RTO. Used when a connection
    /// restarts (e.g. a fresh SYN after a prior attempt timed out).
    pub fn reset(&mut self) {
        self.srtt = None;
        self.rttvar = Duration::ZERO;
        self.rto = self.initial_rto;
    }
}

fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

fn duration_mul_add(a: Duration, a_weight: f64, b: Duration, b_weight: f64) -> Duration {
    a.mul_f64(a_weight) + b.mul_f64(b_weight)
}
