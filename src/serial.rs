use core::cell::Cell;

use critical_section::Mutex;
use embassy_time::Instant;

/// The UART (usually DMA driven) the bus runs on.
///
/// TX and RX share the wire, so every transmitted character comes back on RX.
/// The bus always arms the receive before it starts the transmit.
pub trait Serial {
    type Error: core::fmt::Debug;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error>;

    /// Arms reception of the next `len` characters
    fn start_read(&mut self, len: usize) -> Result<(), Self::Error>;

    /// Starts transmitting `bytes`. May return before the transmission completes.
    fn start_write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// True once the last armed exchange has completed
    fn is_idle(&self) -> bool;

    /// Copies the characters captured by the last receive into `buf`. Positions
    /// that were not received must be left as they are.
    fn read_back(&mut self, buf: &mut [u8]);

    /// Stops any exchange in flight
    fn abort(&mut self) -> Result<(), Self::Error>;

    /// Monotonic clock used for exchange timeouts
    fn now(&self) -> Instant;
}

/// Completion flag for [`Serial`] implementations whose transfer-complete
/// event arrives in an interrupt handler.
///
/// ```
/// use one_wire_uart::CompletionFlag;
///
/// static RX_DONE: CompletionFlag = CompletionFlag::new();
///
/// // in `Serial::start_read`
/// RX_DONE.clear();
/// assert!(!RX_DONE.is_set());
///
/// // in the receive-complete interrupt
/// RX_DONE.signal();
///
/// // in `Serial::is_idle`
/// assert!(RX_DONE.is_set());
/// ```
pub struct CompletionFlag {
    done: Mutex<Cell<bool>>,
}

impl CompletionFlag {
    pub const fn new() -> Self {
        CompletionFlag {
            done: Mutex::new(Cell::new(true)),
        }
    }

    pub fn signal(&self) {
        critical_section::with(|cs| self.done.borrow(cs).set(true));
    }

    /// Marks an exchange as started
    pub fn clear(&self) {
        critical_section::with(|cs| self.done.borrow(cs).set(false));
    }

    pub fn is_set(&self) -> bool {
        critical_section::with(|cs| self.done.borrow(cs).get())
    }
}

impl Default for CompletionFlag {
    fn default() -> Self {
        Self::new()
    }
}
