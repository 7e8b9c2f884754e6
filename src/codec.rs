//! Mapping between logical bytes and UART "slot bytes".
//!
//! At the transfer baud rate one UART character spans one 1-Wire time slot.
//! Sending `0x00` holds the line low for the start bit and all eight data
//! bits (write 0). Sending `0xFF` only pulls it low for the start bit (write 1
//! or read slot), and a device answering 0 stretches that low period, which
//! shows up in the echoed character.

/// Slot byte for a 0 bit
pub const SLOT_0: u8 = 0x00;

/// Slot byte for a 1 bit or a read slot
pub const SLOT_1: u8 = 0xFF;

/// Number of slot bytes per logical byte
pub const SLOTS_PER_BYTE: usize = 8;

pub type Slots = [u8; SLOTS_PER_BYTE];

/// Encodes `value` LSB first, one slot byte per bit
pub fn encode_byte(value: u8) -> Slots {
    let mut slots = [SLOT_0; SLOTS_PER_BYTE];
    for (i, slot) in slots.iter_mut().enumerate() {
        if value & (1 << i) != 0 {
            *slot = SLOT_1;
        }
    }
    slots
}

/// Decodes echoed slot bytes. A bit reads as 1 only if nobody pulled the line
/// low during its slot.
pub fn decode_byte(slots: &Slots) -> u8 {
    let mut output: u8 = 0;
    for slot in slots {
        output >>= 1;
        if *slot == SLOT_1 {
            output |= 0x80;
        }
    }
    output
}
