use std::time::Instant;

use qbase::{Epoch, frame::BeFrame};

/// The record of a sent packet, kept until it is acknowledged, declared lost
/// or its packet number space is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct SentPacket<F> {
    pub pn: u64,
    pub epoch: Epoch,
    pub send_time: Instant,
    pub length: usize,
    pub frames: Vec<F>,
    /// The largest packet number acknowledged by the ACK frame carried in this packet.
    pub largest_acked: Option<u64>,
    pub(crate) in_flight: bool,
    pub(crate) retransmittable: bool,
    pub(crate) retransmission_of: Option<u64>,
}

impl<F: BeFrame> SentPacket<F> {
    pub fn new(epoch: Epoch, pn: u64, send_time: Instant, length: usize, frames: Vec<F>) -> Self {
        Self {
            pn,
            epoch,
            send_time,
            length,
            frames,
            largest_acked: None,
            in_flight: false,
            retransmittable: true,
            retransmission_of: None,
        }
    }

    /// Mark the packet as carrying an ACK frame whose largest acknowledged is `largest_acked`.
    pub fn with_ack(mut self, largest_acked: u64) -> Self {
        self.largest_acked = Some(largest_acked);
        self
    }

    pub fn is_ack_eliciting(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.frame_type().is_ack_eliciting())
    }

    pub fn is_path_probe(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.frame_type().is_path_challenge())
    }

    /// Whether the packet's bytes count toward bytes in flight.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// The packet number this packet retransmits the content of.
    pub fn retransmission_of(&self) -> Option<u64> {
        self.retransmission_of
    }

    pub(crate) fn can_be_retransmitted(&self) -> bool {
        self.retransmittable && !self.is_path_probe()
    }
}

#[cfg(test)]
mod tests {
    use qbase::frame::FrameType;

    use super::*;

    #[test]
    fn test_frame_properties() {
        let now = Instant::now();
        let ack_only = SentPacket::new(Epoch::Data, 1, now, 30, vec![FrameType::Ack(0)]).with_ack(7);
        assert!(!ack_only.is_ack_eliciting());
        assert_eq!(ack_only.largest_acked, Some(7));

        let padded_ping = SentPacket::new(
            Epoch::Initial,
            2,
            now,
            1200,
            vec![FrameType::Ping, FrameType::Padding],
        );
        assert!(padded_ping.is_ack_eliciting());
        assert!(padded_ping.can_be_retransmitted());

        let challenge = SentPacket::new(Epoch::Data, 3, now, 1200, vec![FrameType::PathChallenge]);
        assert!(challenge.is_ack_eliciting());
        assert!(challenge.is_path_probe());
        assert!(!challenge.can_be_retransmitted());
    }
}
