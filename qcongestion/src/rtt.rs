use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use qbase::packet::keys::ProbeTimeout;

pub const INITIAL_RTT: Duration = Duration::from_millis(333);
pub const GRANULARITY: Duration = Duration::from_millis(1);
const ALPHA: f32 = 0.125;
const BETA: f32 = 0.25;

/// RTT estimation, see [section-5](https://www.rfc-editor.org/rfc/rfc9002#section-5)
/// of [QUIC-RECOVERY](https://www.rfc-editor.org/rfc/rfc9002).
#[derive(Debug, Clone)]
pub struct RawRtt {
    max_ack_delay: Duration,
    first_rtt_sample: Option<Instant>,
    latest_rtt: Duration,
    smoothed_rtt: Duration,
    rttvar: Duration,
    min_rtt: Duration,
}

impl Default for RawRtt {
    fn default() -> Self {
        Self {
            max_ack_delay: Duration::ZERO,
            first_rtt_sample: None,
            latest_rtt: Duration::ZERO,
            smoothed_rtt: INITIAL_RTT,
            rttvar: INITIAL_RTT / 2,
            min_rtt: Duration::ZERO,
        }
    }
}

impl RawRtt {
    fn update(&mut self, send_delta: Duration, ack_delay: Duration, now: Instant) {
        if send_delta.is_zero() {
            return;
        }

        // min_rtt ignores acknowledgment delay.
        if self.first_rtt_sample.is_none() || send_delta < self.min_rtt {
            self.min_rtt = send_delta;
        }

        // Adjust for acknowledgment delay if plausible.
        let mut sample = send_delta;
        if sample - self.min_rtt >= ack_delay {
            sample -= ack_delay;
        }
        self.latest_rtt = sample;

        if self.first_rtt_sample.is_none() {
            self.first_rtt_sample = Some(now);
            self.smoothed_rtt = sample;
            self.rttvar = sample / 2;
            return;
        }
        self.rttvar = self.rttvar.mul_f32(1.0 - BETA) + self.smoothed_rtt.abs_diff(sample).mul_f32(BETA);
        self.smoothed_rtt = self.smoothed_rtt.mul_f32(1.0 - ALPHA) + sample.mul_f32(ALPHA);
    }

    fn pto(&self) -> Duration {
        self.smoothed_rtt + std::cmp::max(self.rttvar * 4, GRANULARITY) + self.max_ack_delay
    }
}

/// RTT statistics shared by loss detection, congestion control and the key
/// update engine of one path.
#[derive(Debug, Clone, Default)]
pub struct ArcRtt(Arc<Mutex<RawRtt>>);

impl ArcRtt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an RTT sample: the time between sending a packet and receiving its
    /// acknowledgement, and the acknowledgement delay that may be subtracted
    /// from it.
    pub fn update(&self, send_delta: Duration, ack_delay: Duration, now: Instant) {
        self.0.lock().unwrap().update(send_delta, ack_delay, now);
    }

    pub fn has_sample(&self) -> bool {
        self.0.lock().unwrap().first_rtt_sample.is_some()
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.0.lock().unwrap().smoothed_rtt
    }

    pub fn latest_rtt(&self) -> Duration {
        self.0.lock().unwrap().latest_rtt
    }

    /// Zero before the first sample.
    pub fn min_rtt(&self) -> Duration {
        self.0.lock().unwrap().min_rtt
    }

    pub fn mean_deviation(&self) -> Duration {
        self.0.lock().unwrap().rttvar
    }

    pub fn max_ack_delay(&self) -> Duration {
        self.0.lock().unwrap().max_ack_delay
    }

    pub fn set_max_ack_delay(&self, max_ack_delay: Duration) {
        self.0.lock().unwrap().max_ack_delay = max_ack_delay;
    }

    /// The base probe timeout, without backoff.
    pub fn pto(&self) -> Duration {
        self.0.lock().unwrap().pto()
    }

    /// How long after a later packet was acknowledged an earlier one is
    /// declared lost.
    pub fn loss_delay(&self, time_threshold: f32, granularity: Duration) -> Duration {
        let rtt = self.0.lock().unwrap();
        std::cmp::max(
            std::cmp::max(rtt.latest_rtt, rtt.smoothed_rtt).mul_f32(time_threshold),
            granularity,
        )
    }
}

impl ProbeTimeout for ArcRtt {
    fn pto(&self) -> Duration {
        ArcRtt::pto(self)
    }
}
