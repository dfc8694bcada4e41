use std::ops::{Index, IndexMut};

use derive_more::Display;

/// The encryption level a packet is protected with, which is also the
/// packet number space it is numbered in.
///
/// 0-RTT packets share the [`Epoch::Data`] space with 1-RTT packets.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Epoch {
    #[display("Initial")]
    Initial = 0,
    #[display("Handshake")]
    Handshake = 1,
    #[display("1-RTT")]
    Data = 2,
}

impl Epoch {
    const EPOCHS: [Epoch; 3] = [Epoch::Initial, Epoch::Handshake, Epoch::Data];

    pub fn iter() -> std::slice::Iter<'static, Epoch> {
        Self::EPOCHS.iter()
    }

    pub const fn count() -> usize {
        Self::EPOCHS.len()
    }

    /// Initial and Handshake packets carry the handshake and are retransmitted
    /// more aggressively.
    pub fn is_crypto(&self) -> bool {
        matches!(self, Epoch::Initial | Epoch::Handshake)
    }
}

impl From<Epoch> for usize {
    fn from(e: Epoch) -> Self {
        e as usize
    }
}

impl<T> Index<Epoch> for [T] {
    type Output = T;

    fn index(&self, index: Epoch) -> &Self::Output {
        self.index(usize::from(index))
    }
}

impl<T> IndexMut<Epoch> for [T] {
    fn index_mut(&mut self, index: Epoch) -> &mut Self::Output {
        self.index_mut(usize::from(index))
    }
}
