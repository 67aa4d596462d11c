//! Call bytes: the polling tokens the bus master puts on the line
//!
//! A call byte addresses one device (or everyone) and tells it what kind
//! of transmission window it just received:
//!
//! ```text
//! ┌───┬────┬───────┐
//! │ P │ CC │ AAAAA │
//! └───┴────┴───────┘
//!  bit7 6..5  4..0
//! ```
//!
//! `P` is a parity bit chosen so the total number of set bits is even,
//! `CC` is the call class and `AAAAA` the device address (0 = broadcast).

/// Highest valid device address on the bus
pub const DEVICE_ADDRESS_MAX: u8 = 31;

/// Address that targets every device
pub const BROADCAST_ADDRESS: u8 = 0;

const CLASS_MASK: u8 = 0x60;
const ADDRESS_MASK: u8 = 0x1F;
const PARITY_BIT: u8 = 0x80;

/// What a call byte grants or announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallClass {
    /// Device must answer with a fixed acknowledgement
    AckRequest,
    /// A feedback broadcast message follows
    FeedbackBroadcast,
    /// Normal inquiry: the addressed device may transmit now
    Inquiry,
    /// A message for the addressed device (or everyone) follows
    Message,
}

impl CallClass {
    const fn bits(self) -> u8 {
        match self {
            CallClass::AckRequest => 0x00,
            CallClass::FeedbackBroadcast => 0x20,
            CallClass::Inquiry => 0x40,
            CallClass::Message => 0x60,
        }
    }
}

/// A parity-carrying call byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallByte(u8);

impl CallByte {
    /// Build a call byte for a class and device address
    ///
    /// The address is masked to the 5 valid bits; the parity bit is set
    /// so the byte has an even number of set bits.
    pub fn new(class: CallClass, address: u8) -> Self {
        Self(with_parity(class.bits() | (address & ADDRESS_MASK)))
    }

    /// Interpret a raw byte received while the line was in address mode
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// The raw byte as sent on the wire
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Call class encoded in bits 6..5
    pub fn class(self) -> CallClass {
        match self.0 & CLASS_MASK {
            0x00 => CallClass::AckRequest,
            0x20 => CallClass::FeedbackBroadcast,
            0x40 => CallClass::Inquiry,
            _ => CallClass::Message,
        }
    }

    /// Addressed device (0 = broadcast)
    pub fn address(self) -> u8 {
        self.0 & ADDRESS_MASK
    }

    /// Returns true if this call byte targets every device
    pub fn is_broadcast(self) -> bool {
        self.address() == BROADCAST_ADDRESS
    }

    /// Returns true if the parity bit matches the payload bits
    pub fn parity_ok(self) -> bool {
        with_parity(self.0 & !PARITY_BIT) == self.0
    }
}

/// General broadcast token (`0x60`): message for everyone
pub const GENERAL_BROADCAST: CallByte = CallByte(0x60);

/// Feedback broadcast token (`0xA0`)
pub const FEEDBACK_BROADCAST: CallByte = CallByte(0xA0);

/// Set the parity bit so the total set-bit count of the byte is even
const fn with_parity(byte: u8) -> u8 {
    let mut value = byte & !PARITY_BIT;
    let mut bits = value;
    let mut parity = 0u8;
    while bits != 0 {
        parity ^= 1;
        bits &= bits - 1;
    }
    if parity != 0 {
        value |= PARITY_BIT;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_is_even_for_all_addresses() {
        for addr in 0..=DEVICE_ADDRESS_MAX {
            for class in [
                CallClass::AckRequest,
                CallClass::FeedbackBroadcast,
                CallClass::Inquiry,
                CallClass::Message,
            ] {
                let byte = CallByte::new(class, addr).to_byte();
                assert_eq!(byte.count_ones() % 2, 0, "odd parity for {byte:#04x}");
            }
        }
    }

    #[test]
    fn test_known_tokens() {
        // Values fixed by the protocol: inquiry for address 31, general
        // broadcast, feedback broadcast, ack request for address 26.
        assert_eq!(CallByte::new(CallClass::Inquiry, 31).to_byte(), 0x5F);
        assert_eq!(CallByte::new(CallClass::Message, 0), GENERAL_BROADCAST);
        assert_eq!(
            CallByte::new(CallClass::FeedbackBroadcast, 0),
            FEEDBACK_BROADCAST
        );
        assert_eq!(CallByte::new(CallClass::AckRequest, 26).to_byte(), 0x9A);
    }

    #[test]
    fn test_class_and_address_roundtrip() {
        let byte = CallByte::new(CallClass::Inquiry, 17);
        assert_eq!(byte.class(), CallClass::Inquiry);
        assert_eq!(byte.address(), 17);
        assert!(!byte.is_broadcast());
        assert!(byte.parity_ok());
    }

    #[test]
    fn test_broadcast_detection() {
        assert!(GENERAL_BROADCAST.is_broadcast());
        assert_eq!(GENERAL_BROADCAST.class(), CallClass::Message);
        assert!(FEEDBACK_BROADCAST.is_broadcast());
        assert_eq!(FEEDBACK_BROADCAST.class(), CallClass::FeedbackBroadcast);
    }

    #[test]
    fn test_address_masked_to_valid_range() {
        let byte = CallByte::new(CallClass::Inquiry, 0xFF);
        assert_eq!(byte.address(), DEVICE_ADDRESS_MAX);
    }

    #[test]
    fn test_corrupted_parity_detected() {
        let good = CallByte::new(CallClass::Inquiry, 5).to_byte();
        let bad = CallByte::from_byte(good ^ PARITY_BIT);
        assert!(!bad.parity_ok());
    }
}
