use std::ops::Not;

use derive_more::Display;

/// The key phase bit in 1-RTT packets
const KEY_PHASE_BIT: u8 = 0x04;

/// The key phase bit of a 1-RTT packet header.
///
/// Successive key generations alternate between the two values, the first
/// generation is always [`KeyPhaseBit::Zero`].
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KeyPhaseBit {
    #[default]
    #[display("0")]
    Zero,
    #[display("1")]
    One,
}

impl KeyPhaseBit {
    /// Read the bit from the unprotected first byte of a short header.
    pub fn from_first_byte(byte: u8) -> Self {
        if byte & KEY_PHASE_BIT == 0 {
            Self::Zero
        } else {
            Self::One
        }
    }

    /// Write the bit into the first byte of a short header, before header
    /// protection is applied.
    pub fn imply(&self, byte: &mut u8) {
        match self {
            Self::Zero => *byte &= !KEY_PHASE_BIT,
            Self::One => *byte |= KEY_PHASE_BIT,
        }
    }

    pub fn toggle(&mut self) {
        *self = !*self;
    }

    pub fn as_index(&self) -> usize {
        *self as usize
    }
}

impl Not for KeyPhaseBit {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

impl From<u64> for KeyPhaseBit {
    /// The bit of a key generation counter.
    fn from(generation: u64) -> Self {
        if generation % 2 == 0 {
            Self::Zero
        } else {
            Self::One
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_phase_bit() {
        let mut first = 0x40;
        KeyPhaseBit::One.imply(&mut first);
        assert_eq!(first, 0x44);
        assert_eq!(KeyPhaseBit::from_first_byte(first), KeyPhaseBit::One);
        KeyPhaseBit::Zero.imply(&mut first);
        assert_eq!(first, 0x40);

        let mut bit = KeyPhaseBit::default();
        bit.toggle();
        assert_eq!(bit, KeyPhaseBit::One);
        assert_eq!(!bit, KeyPhaseBit::Zero);
        assert_eq!(KeyPhaseBit::from(3), KeyPhaseBit::One);
        assert_eq!(bit.as_index(), 1);
    }
}
