//! Frame encoding, checksum and byte-at-a-time assembly
//!
//! A frame is `[HEADER][DATA…][CHECKSUM]`, optionally preceded by a call
//! byte when the master transmits. The header's low nibble is the number
//! of data bytes; the checksum is the XOR of header and data, so XOR-ing
//! every byte from header through checksum of a valid frame yields zero.
//! The call byte is outside the checksum domain.

use heapless::Vec;

use crate::callbyte::CallByte;

/// Maximum number of data bytes in one frame
pub const MAX_DATA_BYTES: usize = 7;

/// Maximum complete frame size (CALLBYTE + HEADER + DATA + CHECKSUM)
pub const MAX_FRAME_SIZE: usize = 1 + 1 + MAX_DATA_BYTES + 1;

/// Errors that can occur during frame assembly or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// More data bytes than the protocol allows
    DataTooLarge,
    /// Header announces a data count the protocol cannot carry
    InvalidHeader,
    /// Checksum mismatch
    InvalidChecksum,
    /// Buffer too small for encoding
    BufferTooSmall,
}

/// One bus message, decoded or ready to encode
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    /// Token preceding the message; only master transmissions carry one
    pub call_byte: Option<CallByte>,
    /// Header byte; the low nibble is the data-byte count
    pub header: u8,
    /// Data bytes
    pub data: Vec<u8, MAX_DATA_BYTES>,
}

impl Frame {
    /// Create a frame without a call byte (device-side transmission)
    pub fn new(header: u8, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > MAX_DATA_BYTES {
            return Err(FrameError::DataTooLarge);
        }
        let mut payload = Vec::new();
        payload
            .extend_from_slice(data)
            .map_err(|_| FrameError::DataTooLarge)?;
        Ok(Self {
            call_byte: None,
            header,
            data: payload,
        })
    }

    /// Create a frame preceded by a call byte (master-side transmission)
    pub fn directed(call_byte: CallByte, header: u8, data: &[u8]) -> Result<Self, FrameError> {
        let mut frame = Self::new(header, data)?;
        frame.call_byte = Some(call_byte);
        Ok(frame)
    }

    /// XOR checksum over header and data
    pub fn checksum(&self) -> u8 {
        compute_checksum(self.header, &self.data)
    }

    /// Encode into a byte buffer, returning the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let call_len = usize::from(self.call_byte.is_some());
        let frame_len = call_len + 1 + self.data.len() + 1;
        if buffer.len() < frame_len {
            return Err(FrameError::BufferTooSmall);
        }

        if let Some(call) = self.call_byte {
            buffer[0] = call.to_byte();
        }
        buffer[call_len] = self.header;
        buffer[call_len + 1..call_len + 1 + self.data.len()].copy_from_slice(&self.data);
        buffer[frame_len - 1] = self.checksum();
        Ok(frame_len)
    }

    /// Encode into a heapless Vec
    pub fn encode_to_vec(&self) -> Vec<u8, MAX_FRAME_SIZE> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        // Cannot fail: data is already bounded by MAX_DATA_BYTES
        let len = self.encode(&mut buffer).unwrap_or(0);
        let mut vec = Vec::new();
        let _ = vec.extend_from_slice(&buffer[..len]);
        vec
    }
}

/// XOR reduction of header and data, as appended to every transmission
pub fn compute_checksum(header: u8, data: &[u8]) -> u8 {
    let mut checksum = header;
    for &byte in data {
        checksum ^= byte;
    }
    checksum
}

/// Check a raw `[HEADER][DATA…][CHECKSUM]` slice
///
/// Valid iff XOR-ing every byte, trailing checksum included, yields zero.
pub fn verify(raw: &[u8]) -> bool {
    !raw.is_empty() && raw.iter().fold(0u8, |acc, &b| acc ^ b) == 0
}

/// State machine assembling inbound frames one byte at a time
///
/// The expected length comes from the header's low nibble, so no start
/// byte is needed; the caller resets the assembler when the line-level
/// protocol says a new message begins (a call byte was seen).
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    state: AssemblyState,
    header: u8,
    expected: u8,
    data: Vec<u8, MAX_DATA_BYTES>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyState {
    /// Waiting for the header byte
    Header,
    /// Reading data bytes
    Data,
    /// Waiting for the checksum byte
    Checksum,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Create an assembler waiting for a header
    pub fn new() -> Self {
        Self {
            state: AssemblyState::Header,
            header: 0,
            expected: 0,
            data: Vec::new(),
        }
    }

    /// Drop any partial frame and wait for a header again
    pub fn reset(&mut self) {
        self.state = AssemblyState::Header;
        self.header = 0;
        self.expected = 0;
        self.data.clear();
    }

    /// Returns true if a frame is partially assembled
    pub fn in_progress(&self) -> bool {
        self.state != AssemblyState::Header
    }

    /// Feed a single received byte
    ///
    /// Returns `Ok(Some(frame))` when the byte completes a valid frame,
    /// `Ok(None)` when more bytes are needed, or `Err` on a corrupt frame
    /// (the assembler resets itself and the caller discards the message).
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        match self.state {
            AssemblyState::Header => {
                let count = byte & 0x0F;
                if usize::from(count) > MAX_DATA_BYTES {
                    return Err(FrameError::InvalidHeader);
                }
                self.header = byte;
                self.expected = count;
                self.data.clear();
                self.state = if count == 0 {
                    AssemblyState::Checksum
                } else {
                    AssemblyState::Data
                };
                Ok(None)
            }
            AssemblyState::Data => {
                // Cannot overflow: expected is bounded by MAX_DATA_BYTES
                let _ = self.data.push(byte);
                if self.data.len() == usize::from(self.expected) {
                    self.state = AssemblyState::Checksum;
                }
                Ok(None)
            }
            AssemblyState::Checksum => {
                let expected = compute_checksum(self.header, &self.data);
                if byte != expected {
                    self.reset();
                    return Err(FrameError::InvalidChecksum);
                }
                let frame = Frame {
                    call_byte: None,
                    header: self.header,
                    data: self.data.clone(),
                };
                self.reset();
                Ok(Some(frame))
            }
        }
    }
}
