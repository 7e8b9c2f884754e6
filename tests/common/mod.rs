#![allow(dead_code)]

use std::cell::Cell;
use std::task::Poll;

use embassy_time::Instant;
use one_wire_uart::{commands, crc, Address, CompletionFlag, Config, OneWire, Serial};

pub const RESET_BAUD: u32 = 9600;
pub const TRANSFER_BAUD: u32 = 115_200;

// DS18B20 function commands
const CONVERT_TEMP: u8 = 0x44;
const WRITE_SCRATCHPAD: u8 = 0x4E;
const READ_SCRATCHPAD: u8 = 0xBE;

/// What the simulated UART saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Baud(u32),
    ResetPulse { presence: bool },
    Slots(Vec<u8>),
    Abort,
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    pub rom: Address,
    selected: bool,
    /// Temperature register latched by the next CONVERT T
    pub next_raw_temperature: i16,
    pub scratchpad: [u8; 9],
    pub corrupt_crc: bool,
}

impl SimDevice {
    pub fn new(rom: u64) -> SimDevice {
        SimDevice::with_temperature(rom, 0)
    }

    pub fn with_temperature(rom: u64, raw_temperature: i16) -> SimDevice {
        // power-on scratchpad: 85 °C, TH 0x4B, TL 0x46, 12 bit
        let mut scratchpad = [0x50, 0x05, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x00];
        scratchpad[8] = crc::crc8(&scratchpad[..8]);
        SimDevice {
            rom: Address(rom),
            selected: false,
            next_raw_temperature: raw_temperature,
            scratchpad,
            corrupt_crc: false,
        }
    }

    fn refresh_crc(&mut self) {
        self.scratchpad[8] = crc::crc8(&self.scratchpad[..8]);
        if self.corrupt_crc {
            self.scratchpad[8] ^= 0x01;
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    /// Waiting for a reset
    Idle,
    RomCommand { byte: u8, bits: u8 },
    Search { bit: u8, step: u8 },
    Match { rom: u64, bits: u8 },
    Function { byte: u8, bits: u8 },
    /// Selected devices drive these bytes
    Output { data: Vec<u8>, bit: usize },
    /// Master writes scratchpad bytes TH, TL, config
    Input { data: Vec<u8>, byte: u8, bits: u8 },
}

/// A UART wired to a simulated 1-Wire bus
pub struct SimBus {
    pub devices: Vec<SimDevice>,
    pub events: Vec<Event>,
    /// Reset pulses that go unanswered before devices start answering
    pub ignored_resets: usize,
    /// When set, transfers never complete and nothing is echoed
    pub stuck: bool,
    /// Every device leaves a search after answering this bit
    pub drop_out_at: Option<u8>,
    /// Limits `drop_out_at` to this search pass (1-based), every pass if unset
    pub drop_out_pass: Option<usize>,
    /// SEARCH ROM commands seen so far
    pub search_passes: usize,
    /// The nth `start_write` (1-based) fails
    pub fail_write: Option<usize>,
    pub writes: usize,

    baud_rate: u32,
    armed: usize,
    echo: Vec<u8>,
    done: CompletionFlag,
    millis: Cell<u64>,
    phase: Phase,
}

impl SimBus {
    pub fn new(devices: Vec<SimDevice>) -> SimBus {
        SimBus {
            devices,
            events: Vec::new(),
            ignored_resets: 0,
            stuck: false,
            drop_out_at: None,
            drop_out_pass: None,
            search_passes: 0,
            fail_write: None,
            writes: 0,
            baud_rate: 0,
            armed: 0,
            echo: Vec::new(),
            done: CompletionFlag::new(),
            millis: Cell::new(0),
            phase: Phase::Idle,
        }
    }

    pub fn empty() -> SimBus {
        SimBus::new(Vec::new())
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn reset_pulses(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, Event::ResetPulse { .. }))
            .count()
    }

    /// Number of 8-slot (one byte) exchanges
    pub fn byte_writes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Slots(slots) if slots.len() == 8 => {
                    let slots: [u8; 8] = slots.as_slice().try_into().unwrap();
                    Some(one_wire_uart::codec::decode_byte(&slots))
                }
                _ => None,
            })
            .collect()
    }

    pub fn advance_millis(&self, millis: u64) {
        self.millis.set(self.millis.get() + millis);
    }

    fn reset_pulse(&mut self) -> u8 {
        let presence = !self.devices.is_empty() && self.ignored_resets == 0;
        self.ignored_resets = self.ignored_resets.saturating_sub(1);
        self.events.push(Event::ResetPulse { presence });
        for device in self.devices.iter_mut() {
            device.selected = false;
        }
        if presence {
            self.phase = Phase::RomCommand { byte: 0, bits: 0 };
            // presence pulse pulls the upper nibble down
            0x90
        } else {
            self.phase = Phase::Idle;
            0xF0
        }
    }

    /// Line level driven by the selected devices during a read slot, `true` if
    /// every one of them leaves it high
    fn driven_bit(&self) -> bool {
        let selected = self.devices.iter().filter(|device| device.selected);
        match &self.phase {
            Phase::Search { bit, step: 0 } => selected.fold(true, |line, d| line && d.rom.0 >> bit & 1 == 1),
            Phase::Search { bit, step: 1 } => selected.fold(true, |line, d| line && d.rom.0 >> bit & 1 == 0),
            Phase::Output { data, bit } => data
                .get(bit / 8)
                .map(|byte| byte >> (bit % 8) & 1 == 1)
                .unwrap_or(true),
            _ => true,
        }
    }

    fn slot(&mut self, slot: u8) -> u8 {
        let master_bit = slot == 0xFF;
        let line_high = master_bit && self.driven_bit();
        self.advance(master_bit);
        if line_high {
            slot
        } else if master_bit {
            // start bit stretched by a device holding the line
            0xFE
        } else {
            0x00
        }
    }

    fn advance(&mut self, master_bit: bool) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Idle => Phase::Idle,
            Phase::RomCommand { byte, bits } => {
                let byte = byte | (master_bit as u8) << bits;
                if bits < 7 {
                    Phase::RomCommand { byte, bits: bits + 1 }
                } else {
                    self.rom_command(byte)
                }
            }
            Phase::Search { bit, step } => match step {
                0 | 1 => Phase::Search { bit, step: step + 1 },
                _ => {
                    let drop_out = self.drop_out_at == Some(bit)
                        && self.drop_out_pass.map_or(true, |pass| pass == self.search_passes);
                    for device in self.devices.iter_mut() {
                        if drop_out || (device.rom.0 >> bit & 1 == 1) != master_bit {
                            device.selected = false;
                        }
                    }
                    if bit < 63 {
                        Phase::Search { bit: bit + 1, step: 0 }
                    } else {
                        Phase::Idle
                    }
                }
            },
            Phase::Match { rom, bits } => {
                let rom = rom | (master_bit as u64) << bits;
                if bits < 63 {
                    Phase::Match { rom, bits: bits + 1 }
                } else {
                    for device in self.devices.iter_mut() {
                        device.selected = device.rom.0 == rom;
                    }
                    Phase::Function { byte: 0, bits: 0 }
                }
            }
            Phase::Function { byte, bits } => {
                let byte = byte | (master_bit as u8) << bits;
                if bits < 7 {
                    Phase::Function { byte, bits: bits + 1 }
                } else {
                    self.function_command(byte)
                }
            }
            Phase::Output { data, bit } => Phase::Output { data, bit: bit + 1 },
            Phase::Input { mut data, byte, bits } => {
                let byte = byte | (master_bit as u8) << bits;
                if bits < 7 {
                    Phase::Input { data, byte, bits: bits + 1 }
                } else {
                    data.push(byte);
                    if data.len() == 3 {
                        for device in self.devices.iter_mut().filter(|d| d.selected) {
                            device.scratchpad[2..5].copy_from_slice(&data);
                            device.refresh_crc();
                        }
                        Phase::Idle
                    } else {
                        Phase::Input { data, byte: 0, bits: 0 }
                    }
                }
            }
        };
    }

    fn rom_command(&mut self, command: u8) -> Phase {
        match command {
            commands::SEARCH_ROM => {
                self.search_passes += 1;
                for device in self.devices.iter_mut() {
                    device.selected = true;
                }
                Phase::Search { bit: 0, step: 0 }
            }
            commands::SKIP_ROM => {
                for device in self.devices.iter_mut() {
                    device.selected = true;
                }
                Phase::Function { byte: 0, bits: 0 }
            }
            commands::MATCH_ROM => Phase::Match { rom: 0, bits: 0 },
            commands::READ_ROM => {
                for device in self.devices.iter_mut() {
                    device.selected = true;
                }
                let data = self.wired_and(|device| device.rom.to_bytes().to_vec());
                Phase::Output { data, bit: 0 }
            }
            _ => Phase::Idle,
        }
    }

    fn function_command(&mut self, command: u8) -> Phase {
        match command {
            CONVERT_TEMP => {
                for device in self.devices.iter_mut().filter(|d| d.selected) {
                    let raw = device.next_raw_temperature.to_le_bytes();
                    device.scratchpad[..2].copy_from_slice(&raw);
                    device.refresh_crc();
                }
                Phase::Idle
            }
            READ_SCRATCHPAD => {
                let data = self.wired_and(|device| device.scratchpad.to_vec());
                Phase::Output { data, bit: 0 }
            }
            WRITE_SCRATCHPAD => Phase::Input {
                data: Vec::new(),
                byte: 0,
                bits: 0,
            },
            _ => Phase::Idle,
        }
    }

    /// What the master reads when every selected device drives `data` at once
    fn wired_and(&self, data: impl Fn(&SimDevice) -> Vec<u8>) -> Vec<u8> {
        self.devices
            .iter()
            .filter(|device| device.selected)
            .map(data)
            .reduce(|a, b| a.iter().zip(b.iter()).map(|(x, y)| x & y).collect())
            .unwrap_or_default()
    }
}

impl Serial for SimBus {
    type Error = ();

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ()> {
        self.baud_rate = baud_rate;
        self.events.push(Event::Baud(baud_rate));
        Ok(())
    }

    fn start_read(&mut self, len: usize) -> Result<(), ()> {
        self.armed = len;
        self.done.clear();
        Ok(())
    }

    fn start_write(&mut self, bytes: &[u8]) -> Result<(), ()> {
        assert_eq!(self.armed, bytes.len(), "receive must be armed before transmit");
        self.armed = 0;
        self.echo.clear();

        self.writes += 1;
        if self.fail_write == Some(self.writes) {
            return Err(());
        }

        if self.baud_rate == RESET_BAUD {
            assert_eq!(bytes, &[0xF0]);
            let echo = self.reset_pulse();
            self.echo.push(echo);
        } else {
            assert_eq!(self.baud_rate, TRANSFER_BAUD);
            self.events.push(Event::Slots(bytes.to_vec()));
            for &slot in bytes {
                let echo = self.slot(slot);
                self.echo.push(echo);
            }
        }

        if self.stuck {
            self.echo.clear();
        } else {
            // the receive-complete interrupt
            self.done.signal();
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.done.is_set()
    }

    fn read_back(&mut self, buf: &mut [u8]) {
        let len = buf.len().min(self.echo.len());
        buf[..len].copy_from_slice(&self.echo[..len]);
    }

    fn abort(&mut self) -> Result<(), ()> {
        self.events.push(Event::Abort);
        self.done.signal();
        Ok(())
    }

    fn now(&self) -> Instant {
        // every look at the clock costs a millisecond
        let now = self.millis.get();
        self.millis.set(now + 1);
        Instant::from_millis(now)
    }
}

pub fn config() -> Config {
    Config {
        reset_baud_rate: RESET_BAUD,
        transfer_baud_rate: TRANSFER_BAUD,
    }
}

/// ROM code with a valid CRC byte
pub fn rom(family: u8, serial: u64) -> u64 {
    let mut bytes = [0_u8; 8];
    bytes[0] = family;
    bytes[1..7].copy_from_slice(&serial.to_le_bytes()[..6]);
    bytes[7] = crc::crc8(&bytes[..7]);
    u64::from_le_bytes(bytes)
}

pub fn bus(sim: SimBus) -> OneWire<SimBus> {
    OneWire::with_config(sim, config()).unwrap()
}

/// Polls `step` until it is ready, returning the result and the number of polls
pub fn run<T>(mut step: impl FnMut() -> Poll<T>) -> (T, usize) {
    for polls in 1..=100_000 {
        if let Poll::Ready(result) = step() {
            return (result, polls);
        }
    }
    panic!("operation never finished");
}
