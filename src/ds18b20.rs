//! Polling driver for a bank of DS18B20 thermometers sharing one bus.
//!
//! ```ignore
//! let mut bank = Ds18b20Bank::<3>::new();
//! bank.search(&mut bus)?;
//! bank.configure(&mut bus, Resolution::Bits12)?;
//! loop {
//!     if let Poll::Ready(Ok(())) = bank.poll(&mut bus) {
//!         // every sensor has been read once more
//!     }
//! }
//! ```

use core::task::Poll;

use embassy_time::{Duration, Instant};

use crate::commands::{MATCH_ROM, READ_SLOT, SKIP_ROM};
use crate::crc::check_crc8;
use crate::{Address, OneWire, OneWireError, OneWireResult, ReadStart, Serial};

pub const FAMILY_CODE: u8 = 0x28;

/// Alarm thresholds written by [`Ds18b20Bank::configure`]
pub const DEFAULT_ALARM_HIGH: u8 = 0x64;
pub const DEFAULT_ALARM_LOW: u8 = 0x9E;

pub mod commands {
    pub const CONVERT_TEMP: u8 = 0x44;
    pub const WRITE_SCRATCHPAD: u8 = 0x4E;
    pub const READ_SCRATCHPAD: u8 = 0xBE;
    pub const COPY_SCRATCHPAD: u8 = 0x48;
    pub const RECALL_EEPROM: u8 = 0xB8;
    pub const READ_POWER_SUPPLY: u8 = 0xB4;
}

const SEARCH_ATTEMPTS: u8 = 5;

pub const SCRATCHPAD_LEN: usize = 9;
// MATCH_ROM, 8 ROM bytes, READ_SCRATCHPAD, then the scratchpad read slots
const SCRATCHPAD_START: usize = 10;
const READ_COMMAND_LEN: usize = SCRATCHPAD_START + SCRATCHPAD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Resolution {
    Bits9 = 0b0001_1111,
    Bits10 = 0b0011_1111,
    Bits11 = 0b0101_1111,
    Bits12 = 0b0111_1111,
}

impl Resolution {
    pub fn max_measurement_time_millis(&self) -> u16 {
        match self {
            Resolution::Bits9 => 94,
            Resolution::Bits10 => 188,
            Resolution::Bits11 => 375,
            Resolution::Bits12 => 750,
        }
    }

    pub fn from_config_register(config: u8) -> Option<Resolution> {
        match config {
            0b0001_1111 => Some(Resolution::Bits9),
            0b0011_1111 => Some(Resolution::Bits10),
            0b0101_1111 => Some(Resolution::Bits11),
            0b0111_1111 => Some(Resolution::Bits12),
            _ => None,
        }
    }

    pub fn to_config_register(&self) -> u8 {
        *self as u8
    }
}

impl Default for Resolution {
    /// What the sensor powers up with
    fn default() -> Self {
        Resolution::Bits12
    }
}

/// Temperature in degrees Celsius from the first two scratchpad bytes
pub fn temperature_from_scratchpad(scratchpad: &[u8; SCRATCHPAD_LEN]) -> f32 {
    let raw = i16::from_le_bytes([scratchpad[0], scratchpad[1]]);
    raw as f32 * 0.0625
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Step {
    StartConversion,
    AwaitConversion,
    ReadScratchpad,
}

/// Up to `N` sensors found by [`Ds18b20Bank::search`], converted together
/// with SKIP ROM and read back one by one.
pub struct Ds18b20Bank<const N: usize> {
    devices: [Address; N],
    count: usize,
    temperatures: [Option<f32>; N],
    resolution: Resolution,

    step: Step,
    // sensor currently being read
    cursor: usize,
    conversion_started: Instant,
    command: [u8; READ_COMMAND_LEN],
    scratchpad: [u8; SCRATCHPAD_LEN],
}

impl<const N: usize> Ds18b20Bank<N> {
    pub fn new() -> Self {
        Ds18b20Bank {
            devices: [Address::default(); N],
            count: 0,
            temperatures: [None; N],
            resolution: Resolution::default(),
            step: Step::StartConversion,
            cursor: 0,
            conversion_started: Instant::from_ticks(0),
            command: [READ_SLOT; READ_COMMAND_LEN],
            scratchpad: [0; SCRATCHPAD_LEN],
        }
    }

    /// Addresses found by the last search
    pub fn devices(&self) -> &[Address] {
        &self.devices[..self.count]
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Last valid reading of sensor `index`, in degrees Celsius
    pub fn temperature(&self, index: usize) -> Option<f32> {
        self.temperatures[..self.count].get(index).copied().flatten()
    }

    /// Forgets all sensors and readings, then searches the bus until at least
    /// one device shows up or the attempts run out. Returns the device count.
    pub fn search<S: Serial>(&mut self, bus: &mut OneWire<S>) -> OneWireResult<usize, S::Error> {
        self.devices = [Address::default(); N];
        self.temperatures = [None; N];
        self.count = 0;
        self.step = Step::StartConversion;
        self.cursor = 0;

        bus.clear_state();
        for _ in 0..SEARCH_ATTEMPTS {
            match bus.reset_blocking() {
                Ok(()) | Err(OneWireError::NoDevice) => {}
                Err(err) => return Err(err),
            }
            self.count = bus.search_devices(&mut self.devices)?;
            if self.count > 0 {
                break;
            }
        }
        debug!("{} sensors on the bus", self.count);
        for address in self.devices() {
            if address.family_code() != FAMILY_CODE {
                warn!("{} is not a DS18B20", address);
            }
        }
        Ok(self.count)
    }

    /// Writes the alarm thresholds and `resolution` to every sensor at once
    pub fn configure<S: Serial>(
        &mut self,
        bus: &mut OneWire<S>,
        resolution: Resolution,
    ) -> OneWireResult<(), S::Error> {
        let command = [
            SKIP_ROM,
            commands::WRITE_SCRATCHPAD,
            DEFAULT_ALARM_HIGH,
            DEFAULT_ALARM_LOW,
            resolution.to_config_register(),
        ];
        bus.send_blocking(&command, &mut [], ReadStart::Never)?;
        self.resolution = resolution;
        Ok(())
    }

    /// Runs one step of the measurement cycle. Ready with `Ok` after the last
    /// sensor of a cycle was read; the next call starts a new conversion.
    ///
    /// Readings that fail their CRC keep the previous value.
    pub fn poll<S: Serial>(&mut self, bus: &mut OneWire<S>) -> Poll<OneWireResult<(), S::Error>> {
        if self.count == 0 {
            return Poll::Ready(Err(OneWireError::NoDevice));
        }

        match self.step {
            Step::StartConversion => {
                let command = [SKIP_ROM, commands::CONVERT_TEMP];
                match bus.send(&command, &mut [], ReadStart::Never) {
                    Poll::Pending => {}
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Ready(Ok(())) => {
                        self.conversion_started = bus.now();
                        self.step = Step::AwaitConversion;
                    }
                }
            }
            Step::AwaitConversion => {
                let conversion_time =
                    Duration::from_millis(self.resolution.max_measurement_time_millis() as u64);
                let elapsed = bus.now().saturating_duration_since(self.conversion_started);
                if elapsed > conversion_time {
                    self.cursor = 0;
                    self.prepare_read_command();
                    self.step = Step::ReadScratchpad;
                }
            }
            Step::ReadScratchpad => {
                match bus.send(
                    &self.command,
                    &mut self.scratchpad,
                    ReadStart::At(SCRATCHPAD_START),
                ) {
                    Poll::Pending => {}
                    Poll::Ready(Err(err)) => {
                        self.step = Step::StartConversion;
                        return Poll::Ready(Err(err));
                    }
                    Poll::Ready(Ok(())) => {
                        self.store_reading();
                        if self.cursor + 1 < self.count {
                            self.cursor += 1;
                            self.prepare_read_command();
                        } else {
                            self.cursor = 0;
                            self.step = Step::StartConversion;
                            return Poll::Ready(Ok(()));
                        }
                    }
                }
            }
        }
        Poll::Pending
    }

    fn prepare_read_command(&mut self) {
        self.command[0] = MATCH_ROM;
        self.command[1..9].copy_from_slice(&self.devices[self.cursor].to_bytes());
        self.command[9] = commands::READ_SCRATCHPAD;
        self.command[SCRATCHPAD_START..].fill(READ_SLOT);
    }

    fn store_reading(&mut self) {
        if check_crc8::<()>(&self.scratchpad).is_ok() {
            self.temperatures[self.cursor] = Some(temperature_from_scratchpad(&self.scratchpad));
        } else {
            warn!("scratchpad CRC mismatch for {}", self.devices[self.cursor]);
        }
    }
}

impl<const N: usize> Default for Ds18b20Bank<N> {
    fn default() -> Self {
        Self::new()
    }
}
