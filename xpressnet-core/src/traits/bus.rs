//! Half-duplex serial bus port
//!
//! XpressNet runs on a 9-bit UART: the ninth bit marks call bytes so
//! devices can resynchronize on them in hardware. The port trait keeps
//! that distinction; how the ninth bit is produced (true 9-bit frames,
//! parity tricks on software serial) is the implementation's business,
//! as is driving the transceiver's direction pin.

/// Line direction of a half-duplex transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Receive,
    Transmit,
}

/// Byte-level access to the RS485 line
pub trait BusPort {
    /// Error type for transport operations
    type Error;

    /// Switch the transceiver between driving and listening
    fn set_direction(&mut self, direction: Direction) -> Result<(), Self::Error>;

    /// Transmit one call byte, ninth bit set
    fn send_call_byte(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Transmit data bytes, ninth bit clear
    fn send_data(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}
