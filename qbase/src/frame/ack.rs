// ACK Frame {
//   Type (i) = 0x02..0x03,
//   Largest Acknowledged (i),
//   ACK Delay (i),
//   ACK Range Count (i),
//   First ACK Range (i),
//   ACK Range (..) ...,
//   [ECN Counts (..)],
// }

use std::{ops::RangeInclusive, time::Duration};

use super::{BeFrame, FrameType};
use crate::error::{Error, ErrorKind};

/// A decoded ACK frame.
///
/// Ranges are kept merged and sorted from the largest packet number down,
/// whatever order, overlap or duplication they were handed over with.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckFrame {
    ranges: Vec<RangeInclusive<u64>>,
    delay: Duration,
}

impl BeFrame for AckFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::Ack(0)
    }
}

impl AckFrame {
    /// Build an ACK frame from inclusive ranges, returns `None` if every
    /// range is empty.
    pub fn new(
        ranges: impl IntoIterator<Item = RangeInclusive<u64>>,
        delay: Duration,
    ) -> Option<Self> {
        let mut sorted = ranges
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>();
        sorted.sort_unstable_by_key(|r| *r.start());

        let mut merged: Vec<RangeInclusive<u64>> = Vec::with_capacity(sorted.len());
        for range in sorted {
            match merged.last_mut() {
                Some(last) if *range.start() <= last.end().saturating_add(1) => {
                    if range.end() > last.end() {
                        *last = *last.start()..=*range.end();
                    }
                }
                _ => merged.push(range),
            }
        }
        if merged.is_empty() {
            return None;
        }
        merged.reverse();
        Some(Self {
            ranges: merged,
            delay,
        })
    }

    /// Decode the wire representation: the largest acknowledged, the first
    /// range length and then alternating gaps and range lengths.
    ///
    /// See [section-19.3.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.3.1)
    /// of [QUIC](https://www.rfc-editor.org/rfc/rfc9000.html).
    pub fn from_gaps(
        largest: u64,
        first_range: u64,
        gaps_and_ranges: &[(u64, u64)],
        delay: Duration,
    ) -> Result<Self, Error> {
        let malformed =
            || Error::new(ErrorKind::FrameEncoding, FrameType::Ack(0), "malformed ACK range");

        let mut smallest = largest.checked_sub(first_range).ok_or_else(malformed)?;
        let mut ranges = Vec::with_capacity(gaps_and_ranges.len() + 1);
        ranges.push(smallest..=largest);
        for &(gap, range) in gaps_and_ranges {
            let largest = smallest
                .checked_sub(gap)
                .and_then(|pn| pn.checked_sub(2))
                .ok_or_else(malformed)?;
            smallest = largest.checked_sub(range).ok_or_else(malformed)?;
            ranges.push(smallest..=largest);
        }
        Self::new(ranges, delay).ok_or_else(malformed)
    }

    pub fn largest(&self) -> u64 {
        *self.ranges[0].end()
    }

    pub fn smallest(&self) -> u64 {
        *self.ranges[self.ranges.len() - 1].start()
    }

    /// The ACK delay the peer reported, already scaled by its ack_delay_exponent.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Disjoint ranges, from the largest packet number down.
    pub fn ranges(&self) -> &[RangeInclusive<u64>] {
        &self.ranges
    }

    pub fn acks(&self, pn: u64) -> bool {
        let idx = self.ranges.partition_point(|r| *r.start() > pn);
        self.ranges.get(idx).is_some_and(|r| pn <= *r.end())
    }
}
