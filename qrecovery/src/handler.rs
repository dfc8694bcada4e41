use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use qbase::{
    Epoch,
    error::Error,
    frame::{AckFrame, BeFrame, FrameType},
};
use qcongestion::{ArcRtt, CongestionControl, NewReno};

use crate::{config::RecoveryConfig, mode::SendMode, packet::SentPacket, space::PacketNumberSpace};

/// Packets sent in reaction to one probe timeout.
const PROBE_PACKETS: usize = 2;
/// Sending more than one packet per this interval is done in bursts.
pub const MIN_PACING_DELAY: Duration = Duration::from_micros(100);
/// The backoff stops growing after this many consecutive probe timeouts.
const MAX_PTO_BACKOFF_EXPONENT: u32 = 30;

/// Loss detection and retransmission scheduling of one connection,
/// see [QUIC-RECOVERY](https://www.rfc-editor.org/rfc/rfc9002).
///
/// Tracks every sent ack-eliciting packet per packet number space until it is
/// acknowledged or declared lost, drives the RTT estimator and the congestion
/// controller, maintains the loss detection timer and tells the packet
/// assembler what it may send next.
pub struct SentPacketHandler<F> {
    // None once the space has been discarded
    spaces: [Option<PacketNumberSpace<F>>; 3],
    retransmission_queue: VecDeque<SentPacket<F>>,
    bytes_in_flight: usize,
    // The number of times a PTO has fired without receiving an acknowledgment.
    pto_count: u32,
    num_probes_to_send: usize,
    num_probes_dequeued: usize,
    probe_space: Option<Epoch>,
    handshake_complete: bool,
    time_of_last_sent_ack_eliciting: Option<Instant>,
    time_of_last_sent_crypto: Option<Instant>,
    next_send_time: Option<Instant>,
    loss_detection_timer: Option<Instant>,
    rtt: ArcRtt,
    congestion: Box<dyn CongestionControl>,
    config: RecoveryConfig,
}

impl<F: BeFrame + Clone> SentPacketHandler<F> {
    /// A handler using NewReno, with a random first Initial packet number.
    pub fn new(rtt: ArcRtt, config: RecoveryConfig) -> Self {
        let congestion = Box::new(NewReno::new(rtt.clone()));
        let mut handler = Self::with_congestion(0, rtt, config, congestion);
        handler.spaces[Epoch::Initial] = Some(PacketNumberSpace::with_random_pn());
        handler
    }

    /// A handler driving the given congestion controller, whose first Initial
    /// packet number is `initial_pn`.
    pub fn with_congestion(
        initial_pn: u64,
        rtt: ArcRtt,
        config: RecoveryConfig,
        congestion: Box<dyn CongestionControl>,
    ) -> Self {
        rtt.set_max_ack_delay(config.max_ack_delay());
        Self {
            spaces: [
                Some(PacketNumberSpace::new(initial_pn)),
                Some(PacketNumberSpace::new(0)),
                Some(PacketNumberSpace::new(0)),
            ],
            retransmission_queue: VecDeque::new(),
            bytes_in_flight: 0,
            pto_count: 0,
            num_probes_to_send: 0,
            num_probes_dequeued: PROBE_PACKETS,
            probe_space: None,
            handshake_complete: false,
            time_of_last_sent_ack_eliciting: None,
            time_of_last_sent_crypto: None,
            next_send_time: None,
            loss_detection_timer: None,
            rtt,
            congestion,
            config,
        }
    }

    /// Register a packet that has just been sent.
    ///
    /// Packets of a discarded space are ignored. Panics if the packet number is
    /// not larger than every packet number sent before in its space.
    pub fn sent_packet(&mut self, packet: SentPacket<F>) {
        if self.register(packet).is_some() {
            self.set_loss_detection_timer();
        }
    }

    /// Register packets that carry the retransmitted content of `original`.
    pub fn sent_packets_as_retransmission(
        &mut self,
        packets: impl IntoIterator<Item = SentPacket<F>>,
        original: u64,
    ) {
        let mut ack_eliciting = false;
        for mut packet in packets {
            packet.retransmission_of = Some(original);
            let epoch = packet.epoch;
            let pn = packet.pn;
            if let Some(true) = self.register(packet) {
                ack_eliciting = true;
                if let Some(space) = self.spaces[epoch].as_mut() {
                    space.link(original, pn);
                }
            }
        }
        if ack_eliciting {
            self.set_loss_detection_timer();
        }
    }

    // Returns whether the packet was ack-eliciting, None if it was dropped.
    fn register(&mut self, mut packet: SentPacket<F>) -> Option<bool> {
        let epoch = packet.epoch;
        let Some(space) = self.spaces[epoch].as_mut() else {
            tracing::warn!(pn = packet.pn, %epoch, "Ignoring packet sent in a discarded space");
            return None;
        };
        space.on_sent(packet.pn);

        let (pn, length, send_time) = (packet.pn, packet.length, packet.send_time);
        let is_ack_eliciting = packet.is_ack_eliciting();
        if is_ack_eliciting {
            if epoch.is_crypto() {
                self.time_of_last_sent_crypto = Some(send_time);
            }
            self.time_of_last_sent_ack_eliciting = Some(send_time);
            self.bytes_in_flight += length;
            self.num_probes_to_send = self.num_probes_to_send.saturating_sub(1);
            packet.in_flight = true;
            space.ack_eliciting_in_flight += 1;
            space.history.push(packet);
        } else if let Some(largest_acked) = packet.largest_acked {
            space.ack_only.insert(pn, largest_acked);
        }
        tracing::trace!(pn, %epoch, length, is_ack_eliciting, "Sent packet");

        self.congestion
            .on_packet_sent(send_time, self.bytes_in_flight, pn, length, is_ack_eliciting);
        let base = self.next_send_time.map_or(send_time, |t| t.max(send_time));
        self.next_send_time = Some(base + self.congestion.time_until_send(self.bytes_in_flight));
        Some(is_ack_eliciting)
    }

    /// Process an ACK frame received in packet `ack_pn` at `epoch`.
    ///
    /// Acknowledging a packet number that was never sent in `epoch` is a
    /// protocol violation. Receiving the same ACK twice has no further effect.
    pub fn received_ack(
        &mut self,
        ack: &AckFrame,
        ack_pn: u64,
        epoch: Epoch,
        rcv_time: Instant,
    ) -> Result<(), Error> {
        let largest_acked = ack.largest();
        let Some(space) = self.spaces[epoch].as_mut() else {
            return Err(Error::protocol_violation(
                FrameType::Ack(0),
                format!("Received ACK in discarded {epoch} packet number space"),
            ));
        };
        if space.largest_sent.is_none_or(|largest_sent| largest_acked > largest_sent) {
            return Err(Error::protocol_violation(
                FrameType::Ack(0),
                "Received ACK for an unsent packet",
            ));
        }
        tracing::trace!(ack_pn, %epoch, largest_acked, "Received ACK");

        let largest_advanced = space.largest_acked.is_none_or(|l| largest_acked > l);
        if largest_advanced {
            space.largest_acked = Some(largest_acked);
        }

        if let Some(packet) = space.history.get(largest_acked) {
            if space.largest_acked_send_time.is_none_or(|t| packet.send_time > t) {
                space.largest_acked_send_time = Some(packet.send_time);
                let send_delta = rcv_time.saturating_duration_since(packet.send_time);
                let ack_delay = if epoch == Epoch::Data {
                    ack.delay().min(self.rtt.max_ack_delay())
                } else {
                    Duration::ZERO
                };
                self.rtt.update(send_delta, ack_delay, rcv_time);
                tracing::trace!(
                    latest_rtt = ?self.rtt.latest_rtt(),
                    smoothed_rtt = ?self.rtt.smoothed_rtt(),
                    "Updated RTT"
                );
            }
        }

        let mut acked = ack
            .ranges()
            .iter()
            .flat_map(|range| space.history.pns_within(*range.start(), *range.end()))
            .collect::<Vec<_>>();
        acked.sort_unstable();

        // Queued copies of acknowledged content are obsolete, as is the
        // content retransmitted for packets acknowledged after being lost.
        self.retransmission_queue
            .retain(|packet| packet.epoch != epoch || !ack.acks(packet.pn));
        let delivered = space
            .retransmissions
            .keys()
            .copied()
            .filter(|&pn| ack.acks(pn))
            .collect::<Vec<_>>();
        for original in delivered {
            space.stop_retransmissions(original);
        }

        let newly_confirmed = space
            .ack_only
            .iter()
            .filter(|(pn, _)| ack.acks(**pn))
            .map(|(_, largest)| *largest)
            .max();
        if let Some(largest) = newly_confirmed {
            space.confirm_acked(largest);
        }
        let largest_acked = space.largest_acked.unwrap_or(largest_acked);
        space.ack_only = match largest_acked.checked_add(1) {
            Some(above) => space.ack_only.split_off(&above),
            None => Default::default(),
        };

        if !largest_advanced && acked.is_empty() {
            return Ok(());
        }

        let prior_in_flight = self.bytes_in_flight;
        if !acked.is_empty() {
            self.congestion.maybe_exit_slow_start();
        }
        for pn in acked.iter().copied() {
            let Some(packet) = space.history.remove(pn) else {
                continue;
            };
            if let Some(largest) = packet.largest_acked {
                space.confirm_acked(largest);
            }
            space.stop_retransmissions(pn);
            if packet.in_flight {
                self.bytes_in_flight -= packet.length;
                space.ack_eliciting_in_flight -= 1;
                self.congestion
                    .on_packet_acked(pn, packet.length, prior_in_flight, rcv_time);
            }

            // A retransmission delivers the content of every packet it stands in for.
            let mut original = packet.retransmission_of;
            while let Some(original_pn) = original.take() {
                space.stop_retransmissions(original_pn);
                self.retransmission_queue
                    .retain(|queued| queued.epoch != epoch || queued.pn != original_pn);
                if let Some(retired) = space.history.remove(original_pn) {
                    if retired.in_flight {
                        self.bytes_in_flight -= retired.length;
                        space.ack_eliciting_in_flight -= 1;
                    }
                    tracing::debug!(pn = original_pn, %epoch, "Packet delivered by its retransmission");
                    original = retired.retransmission_of;
                }
            }
        }

        self.detect_lost_packets(rcv_time, epoch, prior_in_flight);
        if !acked.is_empty() {
            self.pto_count = 0;
            self.num_probes_to_send = 0;
            self.num_probes_dequeued = PROBE_PACKETS;
        }
        self.set_loss_detection_timer();
        Ok(())
    }

    fn detect_lost_packets(&mut self, now: Instant, epoch: Epoch, prior_in_flight: usize) {
        let loss_delay = self
            .rtt
            .loss_delay(self.config.time_threshold(), self.config.granularity());
        let packet_threshold = self.config.packet_threshold();
        let Some(space) = self.spaces[epoch].as_mut() else {
            return;
        };
        space.loss_time = None;
        let Some(largest_acked) = space.largest_acked else {
            return;
        };

        // Packets sent at or before this time are lost by the time threshold.
        let lost_send_time = now.checked_sub(loss_delay);
        let mut lost = Vec::new();
        for packet in space.history.iter() {
            if packet.pn >= largest_acked {
                break;
            }
            let time_lost = lost_send_time.is_some_and(|t| packet.send_time <= t);
            let pn_lost = largest_acked - packet.pn >= packet_threshold;
            if epoch.is_crypto() || time_lost || pn_lost {
                lost.push(packet.pn);
            } else {
                let loss_time = packet.send_time + loss_delay;
                space.loss_time = Some(space.loss_time.map_or(loss_time, |t| t.min(loss_time)));
            }
        }

        for pn in lost {
            let Some(mut packet) = space.history.remove(pn) else {
                continue;
            };
            tracing::debug!(pn, %epoch, "Packet lost");
            if let Some(original) = packet.retransmission_of {
                space.unlink(original, pn);
            }
            if packet.in_flight {
                packet.in_flight = false;
                self.bytes_in_flight -= packet.length;
                space.ack_eliciting_in_flight -= 1;
                self.congestion
                    .on_packet_lost(pn, packet.length, prior_in_flight);
            }
            if packet.can_be_retransmitted() {
                self.retransmission_queue.push_back(packet);
            }
        }
    }

    fn earliest_loss_time(&self) -> Option<(Instant, Epoch)> {
        Epoch::iter()
            .filter_map(|&epoch| {
                let space = self.spaces[epoch].as_ref()?;
                space.loss_time.map(|t| (t, epoch))
            })
            .min()
    }

    fn has_outstanding(&self, epochs: &[Epoch]) -> bool {
        epochs.iter().any(|&epoch| {
            self.spaces[epoch]
                .as_ref()
                .is_some_and(|space| space.ack_eliciting_in_flight > 0)
        })
    }

    fn set_loss_detection_timer(&mut self) {
        if let Some((loss_time, _)) = self.earliest_loss_time() {
            self.loss_detection_timer = Some(loss_time);
            return;
        }
        if !self.has_outstanding(Epoch::iter().as_slice()) {
            self.loss_detection_timer = None;
            return;
        }
        let base = if self.has_outstanding(&[Epoch::Initial, Epoch::Handshake]) {
            self.time_of_last_sent_crypto
        } else {
            self.time_of_last_sent_ack_eliciting
        };
        let backoff = self
            .rtt
            .pto()
            .saturating_mul(1 << self.pto_count.min(MAX_PTO_BACKOFF_EXPONENT));
        self.loss_detection_timer = base.and_then(|base| base.checked_add(backoff));
        if self.loss_detection_timer.is_none() {
            tracing::warn!(pto_count = self.pto_count, "Probe timeout out of range");
        }
    }

    /// When [`SentPacketHandler::on_loss_detection_timeout`] should be called
    /// next, `None` if nothing is outstanding.
    pub fn loss_detection_timeout(&self) -> Option<Instant> {
        self.loss_detection_timer
    }

    /// Fire the loss detection timer. Does nothing if it is not due.
    pub fn on_loss_detection_timeout(&mut self, now: Instant) {
        let Some(timer) = self.loss_detection_timer else {
            return;
        };
        if now < timer {
            return;
        }

        if let Some((_, epoch)) = self.earliest_loss_time() {
            tracing::debug!(%epoch, "Loss detection timer fired in loss time mode");
            self.detect_lost_packets(now, epoch, self.bytes_in_flight);
        } else {
            self.pto_count += 1;
            self.num_probes_to_send = PROBE_PACKETS;
            self.num_probes_dequeued = 0;
            self.probe_space = self.select_probe_space();
            tracing::debug!(
                pto_count = self.pto_count,
                probe_space = ?self.probe_space,
                "Loss detection timer fired in PTO mode"
            );
        }
        self.set_loss_detection_timer();
    }

    // The space with the oldest packet in flight, crypto spaces first
    // until the handshake completes.
    fn select_probe_space(&self) -> Option<Epoch> {
        let oldest_in = |epochs: &[Epoch]| {
            epochs
                .iter()
                .filter_map(|&epoch| {
                    let space = self.spaces[epoch].as_ref()?;
                    let packet = space.history.iter().find(|p| p.in_flight)?;
                    Some((packet.send_time, epoch))
                })
                .min()
                .map(|(_, epoch)| epoch)
        };
        if !self.handshake_complete {
            if let Some(epoch) = oldest_in(&[Epoch::Initial, Epoch::Handshake]) {
                return Some(epoch);
            }
        }
        oldest_in(Epoch::iter().as_slice())
    }

    /// The oldest packet queued for retransmission. The caller resends its
    /// retransmittable content in new packets.
    pub fn dequeue_packet_for_retransmission(&mut self) -> Option<SentPacket<F>> {
        self.retransmission_queue.pop_front()
    }

    /// A packet whose content should be sent as a probe.
    ///
    /// At most two probes are handed out per probe timeout. Queued
    /// retransmissions come first, then the oldest retransmittable packet
    /// in flight, which then is no longer retransmitted on loss, then a copy
    /// of the oldest packet in flight.
    pub fn dequeue_probe_packet(&mut self) -> Option<SentPacket<F>> {
        if self.num_probes_dequeued >= PROBE_PACKETS {
            return None;
        }
        let probe = match self.retransmission_queue.pop_front() {
            Some(packet) => packet,
            None => self.probe_from_history()?,
        };
        self.num_probes_dequeued += 1;
        tracing::debug!(pn = probe.pn, epoch = %probe.epoch, "Dequeued probe packet");
        Some(probe)
    }

    fn probe_from_history(&mut self) -> Option<SentPacket<F>> {
        let epoch = self.probe_space.or_else(|| self.select_probe_space())?;
        let space = self.spaces[epoch].as_mut()?;
        if let Some(packet) = space
            .history
            .iter_mut()
            .find(|p| p.in_flight && p.can_be_retransmitted())
        {
            packet.retransmittable = false;
            return Some(packet.clone());
        }
        space.history.iter().find(|p| p.in_flight).cloned()
    }

    /// What the packet assembler may send next.
    pub fn send_mode(&self) -> SendMode {
        if self.spaces.iter().all(Option::is_none) {
            return SendMode::None;
        }
        let tracked = self.retransmission_queue.len()
            + self
                .spaces
                .iter()
                .flatten()
                .map(|space| space.history.len())
                .sum::<usize>();
        if tracked >= self.config.max_tracked_packets() {
            tracing::debug!(tracked, "Limited by the number of tracked packets");
            return SendMode::Ack;
        }
        if self.num_probes_to_send > 0 {
            return SendMode::Probe;
        }
        let can_send = self.congestion.can_send(self.bytes_in_flight);
        if !self.retransmission_queue.is_empty() {
            return if can_send {
                SendMode::Retransmission
            } else {
                SendMode::Ack
            };
        }
        if tracked >= self.config.max_outstanding_packets() || !can_send {
            return SendMode::Ack;
        }
        SendMode::Any
    }

    /// The earliest time the next packet may be sent, `None` before anything was sent.
    pub fn time_until_send(&self) -> Option<Instant> {
        self.next_send_time
    }

    /// How many packets may be sent in one go.
    ///
    /// Owed probes are sent at once. Otherwise a single packet, unless the
    /// pacing interval is below [`MIN_PACING_DELAY`], then as many as fit in it.
    pub fn should_send_num_packets(&self) -> usize {
        if self.num_probes_to_send > 0 {
            return self.num_probes_to_send;
        }
        let delay = self.congestion.time_until_send(self.bytes_in_flight);
        if delay.is_zero() || delay > MIN_PACING_DELAY {
            return 1;
        }
        MIN_PACING_DELAY.as_nanos().div_ceil(delay.as_nanos()) as usize
    }

    /// Discard a packet number space: its packets are neither tracked nor
    /// counted in flight anymore.
    pub fn drop_packets(&mut self, epoch: Epoch) {
        let Some(mut space) = self.spaces[epoch].take() else {
            return;
        };
        for packet in space.history.drain() {
            if packet.in_flight {
                self.bytes_in_flight -= packet.length;
            }
        }
        self.retransmission_queue
            .retain(|packet| packet.epoch != epoch);
        if self.probe_space == Some(epoch) {
            self.probe_space = None;
        }
        self.pto_count = 0;
        self.num_probes_to_send = 0;
        self.num_probes_dequeued = PROBE_PACKETS;
        tracing::debug!(%epoch, "Dropped packet number space");
        self.set_loss_detection_timer();
    }

    /// Called when a Retry is received: every outstanding packet is queued
    /// for retransmission, keeping its packet number.
    pub fn reset_for_retry(&mut self) {
        for &epoch in Epoch::iter() {
            let Some(space) = self.spaces[epoch].as_mut() else {
                continue;
            };
            for mut packet in space.history.drain() {
                packet.in_flight = false;
                if packet.can_be_retransmitted() {
                    self.retransmission_queue.push_back(packet);
                }
            }
            space.ack_eliciting_in_flight = 0;
            space.loss_time = None;
            space.retransmissions.clear();
        }
        self.bytes_in_flight = 0;
        self.pto_count = 0;
        self.num_probes_to_send = 0;
        self.num_probes_dequeued = PROBE_PACKETS;
        self.probe_space = None;
        self.loss_detection_timer = None;
        tracing::debug!(
            queued = self.retransmission_queue.len(),
            "Reset for Retry"
        );
    }

    /// The handshake is complete, probes are no longer forced into the
    /// crypto spaces.
    pub fn set_handshake_complete(&mut self) {
        self.handshake_complete = true;
        self.set_loss_detection_timer();
    }

    /// The packet number the next packet in `epoch` will use.
    pub fn peek_packet_number(&self, epoch: Epoch) -> Option<u64> {
        self.spaces[epoch].as_ref().map(PacketNumberSpace::peek_pn)
    }

    /// Allocate the packet number for the next packet in `epoch`.
    pub fn pop_packet_number(&mut self, epoch: Epoch) -> Option<u64> {
        self.spaces[epoch].as_mut().map(PacketNumberSpace::pop_pn)
    }

    /// The lowest packet number the peer may not yet know we acknowledged.
    /// ACK ranges below it need not be sent again.
    pub fn lowest_not_confirmed_acked(&self, epoch: Epoch) -> Option<u64> {
        self.spaces[epoch]
            .as_ref()
            .map(PacketNumberSpace::lowest_not_confirmed_acked)
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }

    pub fn largest_acked(&self, epoch: Epoch) -> Option<u64> {
        self.spaces[epoch].as_ref()?.largest_acked()
    }

    pub fn largest_sent(&self, epoch: Epoch) -> Option<u64> {
        self.spaces[epoch].as_ref()?.largest_sent()
    }

    /// The number of ack-eliciting packets tracked in `epoch`, 0 once discarded.
    pub fn history_len(&self, epoch: Epoch) -> usize {
        self.spaces[epoch]
            .as_ref()
            .map_or(0, |space| space.history().len())
    }

    /// Tracked packets of `epoch`, in packet number order.
    pub fn sent_packets(&self, epoch: Epoch) -> impl Iterator<Item = &SentPacket<F>> {
        self.spaces[epoch]
            .as_ref()
            .into_iter()
            .flat_map(|space| space.history().iter())
    }

    pub fn queued_retransmissions(&self) -> impl Iterator<Item = &SentPacket<F>> {
        self.retransmission_queue.iter()
    }

    pub fn rtt(&self) -> &ArcRtt {
        &self.rtt
    }
}
