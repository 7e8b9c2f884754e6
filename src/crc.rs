//! CRCs used by 1-Wire devices, see Maxim Application Note 27.

use crate::{OneWireError, OneWireResult};

/// Dow CRC-8 (x^8 + x^5 + x^4 + 1) of `data`.
///
/// Uses the 2x16 table when the `crc8-table` feature is enabled and bitwise
/// folding otherwise. Both give the same result.
#[cfg(feature = "crc8-table")]
pub fn crc8(data: &[u8]) -> u8 {
    crc8_table(data)
}

/// Dow CRC-8 (x^8 + x^5 + x^4 + 1) of `data`.
///
/// Uses the 2x16 table when the `crc8-table` feature is enabled and bitwise
/// folding otherwise. Both give the same result.
#[cfg(not(feature = "crc8-table"))]
pub fn crc8(data: &[u8]) -> u8 {
    crc8_bitwise(data)
}

/// Returns an error if the CRC doesn't match. `data` must end with the CRC
/// byte, so a valid buffer folds to zero.
pub fn check_crc8<E>(data: &[u8]) -> OneWireResult<(), E> {
    if crc8(data) != 0 {
        Err(OneWireError::CrcMismatch)
    } else {
        Ok(())
    }
}

pub fn crc8_bitwise(data: &[u8]) -> u8 {
    let mut crc = 0;
    for byte in data {
        let mut byte = *byte;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
    }
    crc
}

// Low nibble results in the first half, high nibble results in the second.
const CRC8_2X16: [u8; 32] = [
    0x00, 0x5E, 0xBC, 0xE2, 0x61, 0x3F, 0xDD, 0x83, 0xC2, 0x9C, 0x7E, 0x20, 0xA3, 0xFD, 0x1F, 0x41,
    0x00, 0x9D, 0x23, 0xBE, 0x46, 0xDB, 0x65, 0xF8, 0x8C, 0x11, 0xAF, 0x32, 0xCA, 0x57, 0xE9, 0x74,
];

pub fn crc8_table(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, byte| {
        let index = crc ^ byte;
        CRC8_2X16[(index & 0x0F) as usize] ^ CRC8_2X16[16 + (index >> 4) as usize]
    })
}

#[cfg(feature = "crc16")]
const ODD_PARITY: [u8; 16] = [0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0];

/// 1-Wire CRC-16 of `data`, continuing from `seed` (0 for a fresh CRC).
///
/// Devices transmit this CRC inverted, use [`check_crc16`] to compare against
/// what came off the bus.
#[cfg(feature = "crc16")]
pub fn crc16(data: &[u8], seed: u16) -> u16 {
    let mut crc = seed;
    for byte in data {
        let mut cdata = (*byte as u16 ^ crc) & 0xFF;
        crc >>= 8;

        if ODD_PARITY[(cdata & 0x0F) as usize] ^ ODD_PARITY[(cdata >> 4) as usize] != 0 {
            crc ^= 0xC001;
        }

        cdata <<= 6;
        crc ^= cdata;
        cdata <<= 1;
        crc ^= cdata;
    }
    crc
}

/// Compares the CRC-16 of `data` against the two inverted CRC bytes a device
/// sent after it, low byte first.
#[cfg(feature = "crc16")]
pub fn check_crc16(data: &[u8], inverted_crc: [u8; 2], seed: u16) -> bool {
    let crc = !crc16(data, seed);
    crc.to_le_bytes() == inverted_crc
}
