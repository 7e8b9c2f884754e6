#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OneWireError<E> {
    /// The serial port reported an error
    Serial(E),

    /// No presence pulse was seen after every reset attempt
    NoDevice,

    CrcMismatch,
}

pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;

impl<E> From<E> for OneWireError<E> {
    fn from(err: E) -> Self {
        OneWireError::Serial(err)
    }
}
