//! ROM-level command bytes understood by every 1-Wire device.

pub const SEARCH_ROM: u8 = 0xF0;
pub const READ_ROM: u8 = 0x33;
pub const MATCH_ROM: u8 = 0x55;
pub const SKIP_ROM: u8 = 0xCC;
pub const ALARM_SEARCH: u8 = 0xEC;

/// Placeholder for positions of a command buffer that only read. Writing all
/// ones leaves the line to the device for the whole byte.
pub const READ_SLOT: u8 = 0xFF;
