use std::time::{Duration, Instant};

use crate::{CongestionControl, MSS, rtt::ArcRtt};

// The upper bound for the initial window will be
// min (10*MSS, max (2*MSS, 14600))
// See https://datatracker.ietf.org/doc/html/rfc6928#autoid-3
const INIT_CWND: usize = 10 * MSS;
// The RECOMMENDED value is 2 * max_datagram_size.
// See https://datatracker.ietf.org/doc/html/rfc9002#name-initial-and-minimum-congest
const MININUM_WINDOW: usize = 2 * MSS;
const INFINITRE_SSTHRESH: usize = usize::MAX;
// Packets may be sent in a burst of this many datagrams without being
// considered application limited.
const MAX_BURST_PACKETS: usize = 3;
// rate = N * congestion_window / smoothed_rtt
// See https://datatracker.ietf.org/doc/html/rfc9002#section-7.7
const N: f64 = 1.25;
const MIN_SLOW_START_EXIT_DELAY: Duration = Duration::from_millis(4);

/// NewReno, as described in [appendix-B](https://www.rfc-editor.org/rfc/rfc9002#appendix-B)
/// of [QUIC-RECOVERY](https://www.rfc-editor.org/rfc/rfc9002).
///
/// The recovery period is tracked by packet number: losses and acks of
/// packets sent before the last window reduction do not change the window.
#[derive(Debug)]
pub struct NewReno {
    rtt: ArcRtt,
    max_datagram_size: usize,
    congestion_window: usize,
    ssthresh: usize,
    largest_sent_pn: Option<u64>,
    largest_sent_at_last_cutback: Option<u64>,
}

impl NewReno {
    /// B.3. Initialization
    pub fn new(rtt: ArcRtt) -> Self {
        NewReno {
            rtt,
            max_datagram_size: MSS,
            congestion_window: INIT_CWND,
            ssthresh: INFINITRE_SSTHRESH,
            largest_sent_pn: None,
            largest_sent_at_last_cutback: None,
        }
    }

    pub fn congestion_window(&self) -> usize {
        self.congestion_window
    }

    pub fn in_slow_start(&self) -> bool {
        self.congestion_window < self.ssthresh
    }

    /// InCongestionRecovery(sent_time):
    ///   return sent_time <= congestion_recovery_start_time
    fn in_congestion_recovery(&self, pn: u64) -> bool {
        self.largest_sent_at_last_cutback
            .is_some_and(|cutback| pn <= cutback)
    }

    fn is_cwnd_limited(&self, bytes_in_flight: usize) -> bool {
        if bytes_in_flight >= self.congestion_window {
            return true;
        }
        let available = self.congestion_window - bytes_in_flight;
        let slow_start_limited = self.in_slow_start() && bytes_in_flight > self.congestion_window / 2;
        slow_start_limited || available <= MAX_BURST_PACKETS * self.max_datagram_size
    }
}

impl CongestionControl for NewReno {
    fn on_packet_sent(
        &mut self,
        _sent_time: Instant,
        _bytes_in_flight: usize,
        pn: u64,
        _bytes: usize,
        is_ack_eliciting: bool,
    ) {
        if is_ack_eliciting {
            self.largest_sent_pn = Some(self.largest_sent_pn.map_or(pn, |largest| largest.max(pn)));
        }
    }

    /// B.5. On Packet Acknowledgment
    fn on_packet_acked(
        &mut self,
        pn: u64,
        acked_bytes: usize,
        prior_in_flight: usize,
        _event_time: Instant,
    ) {
        // Do not increase congestion window in recovery period.
        if self.in_congestion_recovery(pn) {
            return;
        }
        // Do not increase congestion_window if application limited.
        if !self.is_cwnd_limited(prior_in_flight) {
            return;
        }
        if self.in_slow_start() {
            self.congestion_window += acked_bytes;
        } else {
            self.congestion_window += self.max_datagram_size * acked_bytes / self.congestion_window;
        }
    }

    /// B.6. On New Congestion Event
    fn on_packet_lost(&mut self, pn: u64, _lost_bytes: usize, _prior_in_flight: usize) {
        // No reaction if already in a recovery period.
        if self.in_congestion_recovery(pn) {
            return;
        }
        self.ssthresh = (self.congestion_window / 2).max(MININUM_WINDOW);
        self.congestion_window = self.ssthresh;
        self.largest_sent_at_last_cutback = self.largest_sent_pn;
        tracing::debug!(
            pn,
            cwnd = self.congestion_window,
            "Congestion event, entering recovery"
        );
    }

    /// Leave slow start as soon as the RTT grows noticeably above the minimum,
    /// instead of waiting for the first loss.
    fn maybe_exit_slow_start(&mut self) {
        if !self.in_slow_start() || !self.rtt.has_sample() {
            return;
        }
        let min_rtt = self.rtt.min_rtt();
        let threshold = min_rtt + (min_rtt / 8).max(MIN_SLOW_START_EXIT_DELAY);
        if self.rtt.latest_rtt() > threshold {
            self.ssthresh = self.congestion_window;
            tracing::debug!(cwnd = self.congestion_window, "Exiting slow start");
        }
    }

    fn can_send(&self, bytes_in_flight: usize) -> bool {
        bytes_in_flight < self.congestion_window
    }

    fn time_until_send(&self, _bytes_in_flight: usize) -> Duration {
        let ratio = self.max_datagram_size as f64 / (N * self.congestion_window as f64);
        self.rtt.smoothed_rtt().mul_f64(ratio)
    }
}
