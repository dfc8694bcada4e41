use std::collections::VecDeque;

use crate::packet::SentPacket;

/// Sent packets of one packet number space, in packet number order.
///
/// Slots are kept sorted by packet number and looked up by binary search, so
/// skipped packet numbers take no space. Removing a packet leaves a hole,
/// holes at the front are drained so the deque only spans outstanding packets.
#[derive(Debug)]
pub struct SentPacketHistory<F> {
    deque: VecDeque<(u64, Option<SentPacket<F>>)>,
    len: usize,
}

impl<F> Default for SentPacketHistory<F> {
    fn default() -> Self {
        Self {
            deque: VecDeque::new(),
            len: 0,
        }
    }
}

impl<F> SentPacketHistory<F> {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn slot(&self, pn: u64) -> Option<usize> {
        self.deque.binary_search_by_key(&pn, |(slot_pn, _)| *slot_pn).ok()
    }

    /// Append a packet. Packet numbers must be strictly increasing.
    pub fn push(&mut self, packet: SentPacket<F>) {
        if let Some((last, _)) = self.deque.back() {
            assert!(
                packet.pn > *last,
                "packet {} registered after packet {last}",
                packet.pn,
            );
        }
        self.deque.push_back((packet.pn, Some(packet)));
        self.len += 1;
    }

    pub fn get(&self, pn: u64) -> Option<&SentPacket<F>> {
        self.slot(pn).and_then(|idx| self.deque[idx].1.as_ref())
    }

    pub fn get_mut(&mut self, pn: u64) -> Option<&mut SentPacket<F>> {
        self.slot(pn).and_then(|idx| self.deque[idx].1.as_mut())
    }

    pub fn remove(&mut self, pn: u64) -> Option<SentPacket<F>> {
        let packet = self.slot(pn).and_then(|idx| self.deque[idx].1.take())?;
        self.len -= 1;
        while let Some((_, None)) = self.deque.front() {
            self.deque.pop_front();
        }
        Some(packet)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SentPacket<F>> {
        self.deque.iter().filter_map(|(_, packet)| packet.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut SentPacket<F>> {
        self.deque.iter_mut().filter_map(|(_, packet)| packet.as_mut())
    }

    /// Packet numbers of the tracked packets within `start..=end`.
    pub fn pns_within(&self, start: u64, end: u64) -> Vec<u64> {
        let from = self.deque.partition_point(|(pn, _)| *pn < start);
        let to = self.deque.partition_point(|(pn, _)| *pn <= end);
        if from >= to {
            return Vec::new();
        }
        self.deque
            .range(from..to)
            .filter(|(_, packet)| packet.is_some())
            .map(|(pn, _)| *pn)
            .collect()
    }

    pub fn first(&self) -> Option<&SentPacket<F>> {
        self.iter().next()
    }

    /// Remove every packet, in packet number order.
    pub fn drain(&mut self) -> impl Iterator<Item = SentPacket<F>> + '_ {
        self.len = 0;
        self.deque.drain(..).filter_map(|(_, packet)| packet)
    }
}
