use std::{
    collections::{BTreeMap, HashMap},
    time::Instant,
};

use rand::Rng;

use crate::history::SentPacketHistory;

/// Initial packet numbers are drawn from `0..MAX_INITIAL_PN`.
const MAX_INITIAL_PN: u64 = 1 << 12;

/// Per packet number space state of loss detection.
#[derive(Debug)]
pub struct PacketNumberSpace<F> {
    pub(crate) history: SentPacketHistory<F>,
    next_pn: u64,
    pub(crate) largest_sent: Option<u64>,
    pub(crate) largest_acked: Option<u64>,
    // send time of the packet that last produced an RTT sample
    pub(crate) largest_acked_send_time: Option<Instant>,
    pub(crate) loss_time: Option<Instant>,
    pub(crate) ack_eliciting_in_flight: usize,
    // original pn -> pns of the packets carrying its retransmitted content
    pub(crate) retransmissions: HashMap<u64, Vec<u64>>,
    // non ack-eliciting packets that carried an ACK: pn -> largest acked
    pub(crate) ack_only: BTreeMap<u64, u64>,
    pub(crate) lowest_not_confirmed_acked: u64,
}

impl<F> PacketNumberSpace<F> {
    pub fn new(initial_pn: u64) -> Self {
        Self {
            history: SentPacketHistory::default(),
            next_pn: initial_pn,
            largest_sent: None,
            largest_acked: None,
            largest_acked_send_time: None,
            loss_time: None,
            ack_eliciting_in_flight: 0,
            retransmissions: HashMap::new(),
            ack_only: BTreeMap::new(),
            lowest_not_confirmed_acked: 0,
        }
    }

    /// A space whose first packet number is random, used for Initial packets.
    pub fn with_random_pn() -> Self {
        Self::new(rand::rng().random_range(0..MAX_INITIAL_PN))
    }

    pub fn peek_pn(&self) -> u64 {
        self.next_pn
    }

    pub fn pop_pn(&mut self) -> u64 {
        let pn = self.next_pn;
        self.next_pn = self.next_pn.saturating_add(1);
        pn
    }

    pub(crate) fn on_sent(&mut self, pn: u64) {
        if let Some(largest) = self.largest_sent {
            assert!(pn > largest, "packet {pn} sent after packet {largest}");
        }
        self.largest_sent = Some(pn);
        self.next_pn = self.next_pn.max(pn.saturating_add(1));
    }

    pub(crate) fn confirm_acked(&mut self, largest_acked_by_peer: u64) {
        self.lowest_not_confirmed_acked = self
            .lowest_not_confirmed_acked
            .max(largest_acked_by_peer.saturating_add(1));
    }

    /// Link `child` as a retransmission of `original`.
    pub(crate) fn link(&mut self, original: u64, child: u64) {
        self.retransmissions.entry(original).or_default().push(child);
    }

    pub(crate) fn unlink(&mut self, original: u64, child: u64) {
        if let Some(children) = self.retransmissions.get_mut(&original) {
            children.retain(|&pn| pn != child);
            if children.is_empty() {
                self.retransmissions.remove(&original);
            }
        }
    }

    /// The content of `original` was delivered: its retransmissions, and
    /// theirs, need not be sent again.
    pub(crate) fn stop_retransmissions(&mut self, original: u64) -> Vec<u64> {
        let mut stopped = Vec::new();
        let mut pending = vec![original];
        while let Some(pn) = pending.pop() {
            for child in self.retransmissions.remove(&pn).unwrap_or_default() {
                if let Some(packet) = self.history.get_mut(child) {
                    packet.retransmittable = false;
                }
                stopped.push(child);
                pending.push(child);
            }
        }
        stopped
    }

    pub fn largest_sent(&self) -> Option<u64> {
        self.largest_sent
    }

    pub fn largest_acked(&self) -> Option<u64> {
        self.largest_acked
    }

    pub fn lowest_not_confirmed_acked(&self) -> u64 {
        self.lowest_not_confirmed_acked
    }

    pub fn history(&self) -> &SentPacketHistory<F> {
        &self.history
    }
}
