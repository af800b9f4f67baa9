//! MIDI variable-length quantity codec.
//!
//! Numbers are represented 7 bits per byte, most significant group first.
//! Every byte except the last has bit 7 set; decoding stops at the first
//! byte with bit 7 clear. Values 0..=127 encode as exactly one byte.

use core::fmt;

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// A non-negative integer in MIDI variable-length representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VariableLengthQuantity(pub u64);

impl VariableLengthQuantity {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Encodes into the 7-bit-per-byte wire form.
    pub fn bytes(self) -> SmallVec<[u8; 4]> {
        let mut groups = SmallVec::<[u8; 4]>::new();
        let mut value = self.0;
        groups.push((value & 0x7F) as u8);
        value >>= 7;
        while value > 0 {
            groups.push((value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
        groups.reverse();
        groups
    }

    /// Number of bytes `bytes()` will produce.
    pub fn encoded_len(self) -> usize {
        let mut len = 1;
        let mut value = self.0 >> 7;
        while value > 0 {
            len += 1;
            value >>= 7;
        }
        len
    }

    /// Decodes a quantity from the front of `data`, returning the value
    /// and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut value: u64 = 0;
        for (i, &byte) in data.iter().enumerate() {
            if value > u64::MAX >> 7 {
                return Err(Error::InvalidLength(
                    "variable-length quantity overflows 64 bits".into(),
                ));
            }
            value = (value << 7) | (byte & 0x7F) as u64;
            if byte & 0x80 == 0 {
                return Ok((Self(value), i + 1));
            }
        }
        Err(Error::InvalidLength(
            "truncated variable-length quantity".into(),
        ))
    }
}

impl From<u64> for VariableLengthQuantity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<usize> for VariableLengthQuantity {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

impl From<VariableLengthQuantity> for u64 {
    fn from(quantity: VariableLengthQuantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for VariableLengthQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
