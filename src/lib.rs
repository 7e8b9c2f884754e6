#![no_std]

//! 1-Wire bus master running on a UART.
//!
//! The UART and the 1-Wire line are tied together (TX open-drain, RX on the
//! same wire), so every transmitted character is echoed back. At a low baud
//! rate one `0xF0` character is a reset pulse followed by the presence window;
//! at a high baud rate one character is one time slot, see [`codec`].
//!
//! [`OneWire::reset`] and [`OneWire::send`] never block. Each call does one
//! step and returns [`Poll::Pending`] until the operation is over, so they can
//! be driven from a super-loop or a timer tick.

use core::task::Poll;

use embassy_time::{Duration, Instant};

#[macro_use]
mod fmt;

mod address;
pub mod codec;
pub mod commands;
pub mod crc;
#[cfg(feature = "ds18b20")]
pub mod ds18b20;
mod error;
#[cfg(feature = "search")]
mod search;
mod serial;

pub use address::Address;
pub use error::{OneWireError, OneWireResult};
pub use serial::{CompletionFlag, Serial};

use codec::{Slots, SLOTS_PER_BYTE};

/// Presence-pulse retries after the first reset pulse
pub const RESET_RETRIES: u8 = 4;

/// Longest a single UART exchange may take before it is treated as complete
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(5);

/// Sent at the reset baud rate: the low nibble plus start bit form the reset
/// pulse, and a present device pulls the high nibble down.
pub const RESET_PULSE: u8 = 0xF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// One character at this rate covers the reset pulse and presence window
    pub reset_baud_rate: u32,

    /// One character at this rate covers one time slot
    pub transfer_baud_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reset_baud_rate: 9600,
            transfer_baud_rate: 115_200,
        }
    }
}

/// Which transmitted bytes of a [`OneWire::send`] get captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadStart {
    /// Write only, nothing is stored
    Never,

    /// Skip this many leading bytes, then store every following echo
    At(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ResetState {
    Init,
    SendPresencePulse,
    AwaitCompletion,
    CheckPresence,
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum TransferState {
    Setup,
    WriteByte,
    AwaitCompletion,
    ConsumeReadSlot,
}

/// One physical bus.
///
/// Only one operation may be in flight at a time: poll it until it is ready
/// before starting another, or call [`OneWire::clear_state`] to drop it.
pub struct OneWire<S> {
    serial: S,
    config: Config,

    tx_slots: Slots,
    rx_slots: Slots,

    reset_state: ResetState,
    transfer_state: TransferState,
    reset_retries: u8,
    device_present: bool,
    last_exchange: Instant,

    // Positions inside the buffers handed to `send`
    command_cursor: usize,
    data_cursor: usize,
    read_start: ReadStart,
}

impl<S: Serial> OneWire<S> {
    pub fn new(serial: S) -> OneWireResult<OneWire<S>, S::Error> {
        OneWire::with_config(serial, Config::default())
    }

    pub fn with_config(mut serial: S, config: Config) -> OneWireResult<OneWire<S>, S::Error> {
        serial.set_baud_rate(config.reset_baud_rate)?;
        Ok(OneWire {
            serial,
            config,
            tx_slots: [codec::SLOT_1; SLOTS_PER_BYTE],
            rx_slots: [codec::SLOT_1; SLOTS_PER_BYTE],
            reset_state: ResetState::Init,
            transfer_state: TransferState::Setup,
            reset_retries: 0,
            device_present: false,
            last_exchange: Instant::from_ticks(0),
            command_cursor: 0,
            data_cursor: 0,
            read_start: ReadStart::Never,
        })
    }

    pub fn into_inner(self) -> S {
        self.serial
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current time on the serial port's clock
    pub fn now(&self) -> Instant {
        self.serial.now()
    }

    /// True when no reset or transfer is in flight
    pub fn is_idle(&self) -> bool {
        self.reset_state == ResetState::Init && self.transfer_state == TransferState::Setup
    }

    /// Drops whatever operation is in flight. The line itself may be left
    /// mid-slot, so the next operation should start with a reset (both
    /// [`OneWire::reset`] and [`OneWire::send`] do).
    pub fn clear_state(&mut self) {
        self.reset_state = ResetState::Init;
        self.transfer_state = TransferState::Setup;
        self.reset_retries = 0;
        self.device_present = false;
        self.last_exchange = Instant::from_ticks(0);
        self.command_cursor = 0;
        self.data_cursor = 0;
        self.read_start = ReadStart::Never;
    }

    /// Runs one step of a reset / presence-detect cycle.
    ///
    /// Returns `Ready(Ok(()))` once a device answered, and
    /// `Ready(Err(OneWireError::NoDevice))` when none did after
    /// [`RESET_RETRIES`] retries. The serial port is left at the transfer
    /// baud rate either way.
    pub fn reset(&mut self) -> Poll<OneWireResult<(), S::Error>> {
        let result = self.reset_step();
        if let Poll::Ready(Err(OneWireError::Serial(_))) = result {
            self.reset_state = ResetState::Init;
        }
        result
    }

    fn reset_step(&mut self) -> Poll<OneWireResult<(), S::Error>> {
        match self.reset_state {
            ResetState::Init => {
                self.serial.set_baud_rate(self.config.reset_baud_rate)?;
                self.reset_retries = RESET_RETRIES;
                self.device_present = false;
                self.reset_state = ResetState::SendPresencePulse;
            }
            ResetState::SendPresencePulse => {
                self.tx_slots[0] = RESET_PULSE;
                self.start_exchange(1)?;
                self.reset_state = ResetState::AwaitCompletion;
            }
            ResetState::AwaitCompletion => {
                if self.exchange_finished() {
                    self.finish_exchange(1);
                    self.reset_state = ResetState::CheckPresence;
                }
            }
            ResetState::CheckPresence => {
                if self.rx_slots[0] != RESET_PULSE {
                    self.device_present = true;
                    self.reset_state = ResetState::Finalize;
                } else if self.reset_retries > 0 {
                    self.reset_retries -= 1;
                    self.reset_state = ResetState::SendPresencePulse;
                } else {
                    self.reset_state = ResetState::Finalize;
                }
            }
            ResetState::Finalize => {
                self.reset_state = ResetState::Init;
                self.serial.set_baud_rate(self.config.transfer_baud_rate)?;
                return Poll::Ready(if self.device_present {
                    trace!("presence pulse after {} retries", RESET_RETRIES - self.reset_retries);
                    Ok(())
                } else {
                    warn!("no presence pulse");
                    Err(OneWireError::NoDevice)
                });
            }
        }
        Poll::Pending
    }

    /// Runs one step of a reset followed by writing `command`.
    ///
    /// The echo of every written byte is decoded; bytes from `read_start` on
    /// are stored into `data` until it is full. Use [`commands::READ_SLOT`] in
    /// `command` for positions that should only read. The same buffers must be
    /// passed on every call until the transfer is ready.
    ///
    /// ```ignore
    /// // read the ROM code of the only device on the bus
    /// let command = [commands::READ_ROM, READ_SLOT, READ_SLOT, READ_SLOT, READ_SLOT,
    ///                READ_SLOT, READ_SLOT, READ_SLOT, READ_SLOT];
    /// let mut rom = [0; 8];
    /// while bus.send(&command, &mut rom, ReadStart::At(1)).is_pending() {}
    /// ```
    pub fn send(
        &mut self,
        command: &[u8],
        data: &mut [u8],
        read_start: ReadStart,
    ) -> Poll<OneWireResult<(), S::Error>> {
        let result = self.send_step(command, data, read_start);
        if let Poll::Ready(Err(_)) = result {
            self.transfer_state = TransferState::Setup;
        }
        result
    }

    fn send_step(
        &mut self,
        command: &[u8],
        data: &mut [u8],
        read_start: ReadStart,
    ) -> Poll<OneWireResult<(), S::Error>> {
        match self.transfer_state {
            TransferState::Setup => match self.reset() {
                Poll::Pending => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Ready(Ok(())) => {
                    self.command_cursor = 0;
                    self.data_cursor = 0;
                    self.read_start = read_start;
                    self.transfer_state = TransferState::WriteByte;
                }
            },
            TransferState::WriteByte => match command.get(self.command_cursor) {
                Some(&byte) => {
                    self.tx_slots = codec::encode_byte(byte);
                    self.command_cursor += 1;
                    self.start_exchange(SLOTS_PER_BYTE)?;
                    self.transfer_state = TransferState::AwaitCompletion;
                }
                None => {
                    self.transfer_state = TransferState::Setup;
                    return Poll::Ready(Ok(()));
                }
            },
            TransferState::AwaitCompletion => {
                if self.exchange_finished() {
                    self.finish_exchange(SLOTS_PER_BYTE);
                    self.transfer_state = TransferState::ConsumeReadSlot;
                }
            }
            TransferState::ConsumeReadSlot => {
                let value = codec::decode_byte(&self.rx_slots);
                match self.read_start {
                    ReadStart::At(0) => {
                        if let Some(slot) = data.get_mut(self.data_cursor) {
                            *slot = value;
                            self.data_cursor += 1;
                        }
                    }
                    ReadStart::At(skip) => self.read_start = ReadStart::At(skip - 1),
                    ReadStart::Never => {}
                }
                self.transfer_state = TransferState::WriteByte;
            }
        }
        Poll::Pending
    }

    /// Polls [`OneWire::reset`] until it is ready
    pub fn reset_blocking(&mut self) -> OneWireResult<(), S::Error> {
        loop {
            if let Poll::Ready(result) = self.reset() {
                return result;
            }
        }
    }

    /// Polls [`OneWire::send`] until it is ready
    pub fn send_blocking(
        &mut self,
        command: &[u8],
        data: &mut [u8],
        read_start: ReadStart,
    ) -> OneWireResult<(), S::Error> {
        loop {
            if let Poll::Ready(result) = self.send(command, data, read_start) {
                return result;
            }
        }
    }

    /// Arms the receive, then transmits the first `len` slots
    fn start_exchange(&mut self, len: usize) -> Result<(), S::Error> {
        // a character that never comes back reads as an undisturbed line
        self.rx_slots[..len].copy_from_slice(&self.tx_slots[..len]);
        self.serial.start_read(len)?;
        self.serial.start_write(&self.tx_slots[..len])?;
        self.last_exchange = self.serial.now();
        Ok(())
    }

    fn exchange_finished(&self) -> bool {
        if self.serial.is_idle() {
            return true;
        }
        let elapsed = self.serial.now().saturating_duration_since(self.last_exchange);
        if elapsed > EXCHANGE_TIMEOUT {
            warn!("serial exchange timed out");
            return true;
        }
        false
    }

    fn finish_exchange(&mut self, len: usize) {
        self.serial.read_back(&mut self.rx_slots[..len]);
    }
}
