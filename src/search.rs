//! ROM search, see Maxim Application Note 187.
//! https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html

use crate::codec::{SLOT_0, SLOT_1};
use crate::{commands, Address, OneWire, OneWireError, OneWireResult, ReadStart, Serial};

impl<S: Serial> OneWire<S> {
    /// Enumerates the devices on the bus into `devices` and returns how many
    /// were found.
    ///
    /// Runs to completion, one search pass per device. Where addresses
    /// disagree the 1 branch is taken first, so addresses come out in
    /// descending order of their first differing bit. Stops early, keeping
    /// what was found, when `devices` is full, no device answers the reset,
    /// or the bus goes silent mid-pass.
    pub fn search_devices(&mut self, devices: &mut [Address]) -> OneWireResult<usize, S::Error> {
        self.clear_state();
        self.serial.abort()?;

        let mut found = 0;
        // 1-based bit position of the deepest collision left to explore, 0 for none
        let mut last_collision: u8 = 0;

        while found < devices.len() {
            match self.send_blocking(&[commands::SEARCH_ROM], &mut [], ReadStart::Never) {
                Ok(()) => {}
                Err(OneWireError::NoDevice) => return Ok(found),
                Err(err) => return Err(err),
            }

            let previous = found
                .checked_sub(1)
                .map(|index| devices[index])
                .unwrap_or_default();
            let mut address = Address::default();
            let mut current_collision: u8 = 0;

            for bit in 1..=64_u8 {
                let index = bit - 1;
                let chosen_bit = match self.read_bit_pair()? {
                    (true, true) => {
                        // Nobody answered, every device dropped off the bus
                        debug!("bus silent at bit {}", bit);
                        return Ok(found);
                    }
                    (true, false) => true,
                    (false, true) => false,
                    (false, false) => {
                        if bit < last_collision {
                            // follow the previous path; its 0 branch is still unexplored
                            let previous_bit = previous.bit(index);
                            if previous_bit {
                                current_collision = bit;
                            }
                            previous_bit
                        } else if bit == last_collision {
                            false
                        } else {
                            current_collision = bit;
                            true
                        }
                    }
                };
                address.set_bit(index, chosen_bit);
                self.write_bit(chosen_bit)?;
            }

            devices[found] = address;
            found += 1;
            trace!("found {} (collision at bit {})", address, current_collision);

            if current_collision == 0 {
                break;
            }
            last_collision = current_collision;
        }
        Ok(found)
    }

    /// Reads an address bit and its complement
    fn read_bit_pair(&mut self) -> OneWireResult<(bool, bool), S::Error> {
        self.tx_slots[0] = SLOT_1;
        self.tx_slots[1] = SLOT_1;
        self.exchange_blocking(2)?;
        Ok((self.rx_slots[0] == SLOT_1, self.rx_slots[1] == SLOT_1))
    }

    fn write_bit(&mut self, value: bool) -> OneWireResult<(), S::Error> {
        self.tx_slots[0] = if value { SLOT_1 } else { SLOT_0 };
        self.exchange_blocking(1)
    }

    /// Exchanges `len` slots, spinning until the serial port is done or the
    /// exchange times out
    fn exchange_blocking(&mut self, len: usize) -> OneWireResult<(), S::Error> {
        self.start_exchange(len)?;
        while !self.exchange_finished() {}
        self.finish_exchange(len);
        Ok(())
    }
}
