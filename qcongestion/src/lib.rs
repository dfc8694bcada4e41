use std::time::{Duration, Instant};

mod new_reno;
pub use new_reno::NewReno;
pub mod rtt;
pub use rtt::ArcRtt;

///  default datagram size in bytes.
pub const MSS: usize = 1200;

/// Interface of a congestion controller as seen by loss detection.
///
/// Loss detection owns bytes in flight and hands the current value to every
/// call. Implementations are called synchronously and must not call back into
/// loss detection.
pub trait CongestionControl: Send {
    /// A packet was sent, `bytes_in_flight` already includes it if it counts.
    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: usize,
        pn: u64,
        bytes: usize,
        is_ack_eliciting: bool,
    );

    /// A packet counted in flight was acknowledged.
    ///
    /// `prior_in_flight` is bytes in flight before the ACK was processed.
    fn on_packet_acked(
        &mut self,
        pn: u64,
        acked_bytes: usize,
        prior_in_flight: usize,
        event_time: Instant,
    );

    /// A packet counted in flight was declared lost.
    fn on_packet_lost(&mut self, pn: u64, lost_bytes: usize, prior_in_flight: usize);

    /// Called once per ACK that acknowledges new packets, before any
    /// [`CongestionControl::on_packet_acked`].
    fn maybe_exit_slow_start(&mut self);

    fn can_send(&self, bytes_in_flight: usize) -> bool;

    /// The pacing delay between two packets.
    fn time_until_send(&self, bytes_in_flight: usize) -> Duration;
}

impl<C: CongestionControl + ?Sized> CongestionControl for Box<C> {
    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: usize,
        pn: u64,
        bytes: usize,
        is_ack_eliciting: bool,
    ) {
        (**self).on_packet_sent(sent_time, bytes_in_flight, pn, bytes, is_ack_eliciting)
    }

    fn on_packet_acked(
        &mut self,
        pn: u64,
        acked_bytes: usize,
        prior_in_flight: usize,
        event_time: Instant,
    ) {
        (**self).on_packet_acked(pn, acked_bytes, prior_in_flight, event_time)
    }

    fn on_packet_lost(&mut self, pn: u64, lost_bytes: usize, prior_in_flight: usize) {
        (**self).on_packet_lost(pn, lost_bytes, prior_in_flight)
    }

    fn maybe_exit_slow_start(&mut self) {
        (**self).maybe_exit_slow_start()
    }

    fn can_send(&self, bytes_in_flight: usize) -> bool {
        (**self).can_send(bytes_in_flight)
    }

    fn time_until_send(&self, bytes_in_flight: usize) -> Duration {
        (**self).time_until_send(bytes_in_flight)
    }
}
