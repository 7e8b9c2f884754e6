use core::fmt;

use crate::crc;

/// A 64-bit ROM code. Byte 0 (the least significant byte) is the family code,
/// bytes 1..7 the serial number and byte 7 the CRC-8 of the preceding bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address(pub u64);

impl Address {
    pub const fn from_bytes(bytes: [u8; 8]) -> Address {
        Address(u64::from_le_bytes(bytes))
    }

    /// The ROM code in bus order
    pub const fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn family_code(&self) -> u8 {
        self.to_bytes()[0]
    }

    pub fn crc(&self) -> u8 {
        self.to_bytes()[7]
    }

    /// Returns true if the trailing byte is the CRC-8 of the first seven
    pub fn check_crc(&self) -> bool {
        crc::crc8(&self.to_bytes()) == 0
    }

    #[cfg(feature = "search")]
    pub(crate) fn bit(&self, index: u8) -> bool {
        self.0 & (1_u64 << index) != 0
    }

    #[cfg(feature = "search")]
    pub(crate) fn set_bit(&mut self, index: u8, value: bool) {
        let mask = 1_u64 << index;
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl From<[u8; 8]> for Address {
    fn from(bytes: [u8; 8]) -> Self {
        Address::from_bytes(bytes)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(self, f)
    }
}
