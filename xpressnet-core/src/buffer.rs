//! Frame ring buffers
//!
//! Two of these decouple the execution contexts: the RX buffer is filled
//! byte by byte from the receive interrupt and drained by `poll`, the TX
//! buffer is filled by the API and drained one frame per transmission
//! window. Access is serialized through the exclusive reference to the
//! station; interrupt embeddings wrap it in their platform's
//! critical-section cell.
//!
//! Overflow policy differs by direction: inbound messages are dropped
//! when the buffer is full (the protocol heals via sender retry),
//! outbound enqueues are rejected so the caller can report the failure.

use xpressnet_protocol::{CallByte, Frame, FrameAssembler, FrameError};

/// Buffer errors visible to producers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// No free slot; the message was not stored
    Full,
}

/// Fixed-depth FIFO of complete frames with an in-progress write cursor
///
/// `begin_write`/`append_byte` assemble one inbound message in place; it
/// becomes visible to the reader only once its checksum validated. The
/// TX side uses `push` with already-complete frames instead.
#[derive(Debug)]
pub struct FrameRing<const DEPTH: usize> {
    slots: [Option<Frame>; DEPTH],
    /// Next slot to read; always below `DEPTH`
    read: usize,
    /// Next slot to write; always below `DEPTH`
    write: usize,
    /// Number of complete frames stored
    count: usize,
    /// Assembly state for the message currently being received
    assembler: FrameAssembler,
    /// Call byte that opened the in-progress message, if any
    open_call: Option<CallByte>,
    writing: bool,
}

impl<const DEPTH: usize> Default for FrameRing<DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DEPTH: usize> FrameRing<DEPTH> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            read: 0,
            write: 0,
            count: 0,
            assembler: FrameAssembler::new(),
            open_call: None,
            writing: false,
        }
    }

    /// Number of complete frames waiting to be read
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == DEPTH
    }

    /// Enqueue a complete frame (TX side); rejected when full
    pub fn push(&mut self, frame: Frame) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::Full);
        }
        self.slots[self.write] = Some(frame);
        self.write = (self.write + 1) % DEPTH;
        self.count += 1;
        Ok(())
    }

    /// Remove and return the oldest complete frame
    pub fn try_read(&mut self) -> Option<Frame> {
        if self.is_empty() {
            return None;
        }
        let frame = self.slots[self.read].take();
        self.read = (self.read + 1) % DEPTH;
        self.count -= 1;
        frame
    }

    /// Open an in-progress message slot (RX side)
    ///
    /// Fails when the buffer is full; the caller then drops the incoming
    /// bytes until the next message boundary.
    pub fn begin_write(&mut self, call_byte: Option<CallByte>) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::Full);
        }
        self.assembler.reset();
        self.open_call = call_byte;
        self.writing = true;
        Ok(())
    }

    /// Returns true while an inbound message is partially assembled
    pub fn write_in_progress(&self) -> bool {
        self.writing
    }

    /// Append one received byte to the in-progress message
    ///
    /// Returns `Ok(true)` when the byte completed a valid message and it
    /// was committed, `Ok(false)` when more bytes are needed. On framing
    /// or checksum errors the partial message is discarded.
    pub fn append_byte(&mut self, byte: u8) -> Result<bool, FrameError> {
        if !self.writing {
            // No open slot: byte belongs to a message we chose to drop
            return Ok(false);
        }
        match self.assembler.feed(byte) {
            Ok(Some(mut frame)) => {
                frame.call_byte = self.open_call.take();
                self.writing = false;
                // Capacity was reserved by begin_write
                let _ = self.push(frame);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                self.abort_write();
                Err(err)
            }
        }
    }

    /// Drop the in-progress message without committing it
    pub fn abort_write(&mut self) {
        self.assembler.reset();
        self.open_call = None;
        self.writing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpressnet_protocol::callbyte::{CallClass, GENERAL_BROADCAST};

    fn frame(header: u8, data: &[u8]) -> Frame {
        Frame::new(header, data).unwrap()
    }

    fn feed_all<const N: usize>(ring: &mut FrameRing<N>, frame: &Frame) {
        ring.begin_write(None).unwrap();
        for &byte in &frame.encode_to_vec() {
            ring.append_byte(byte).unwrap();
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut ring: FrameRing<5> = FrameRing::new();
        for i in 0..3u8 {
            ring.push(frame(0x21, &[i])).unwrap();
        }
        for i in 0..3u8 {
            assert_eq!(ring.try_read(), Some(frame(0x21, &[i])));
        }
        assert_eq!(ring.try_read(), None);
    }

    #[test]
    fn test_push_rejected_when_full() {
        let mut ring: FrameRing<5> = FrameRing::new();
        for i in 0..5u8 {
            ring.push(frame(0x21, &[i])).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(frame(0x21, &[9])), Err(BufferError::Full));
        // Buffer contents unchanged
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.try_read(), Some(frame(0x21, &[0])));
    }

    #[test]
    fn test_begin_write_rejected_when_full() {
        let mut ring: FrameRing<2> = FrameRing::new();
        ring.push(frame(0x80, &[])).unwrap();
        ring.push(frame(0x80, &[])).unwrap();
        assert_eq!(ring.begin_write(None), Err(BufferError::Full));
        // Bytes arriving without an open slot are ignored
        assert_eq!(ring.append_byte(0x21), Ok(false));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_assembled_message_visible_after_checksum() {
        let mut ring: FrameRing<5> = FrameRing::new();
        let message = frame(0xE3, &[0x00, 0x00, 0x03]);
        let encoded = message.encode_to_vec();

        ring.begin_write(Some(GENERAL_BROADCAST)).unwrap();
        for &byte in &encoded[..encoded.len() - 1] {
            assert_eq!(ring.append_byte(byte), Ok(false));
            // Not visible until committed
            assert!(ring.is_empty());
        }
        assert_eq!(ring.append_byte(encoded[encoded.len() - 1]), Ok(true));

        let stored = ring.try_read().unwrap();
        assert_eq!(stored.header, 0xE3);
        assert_eq!(stored.call_byte, Some(GENERAL_BROADCAST));
    }

    #[test]
    fn test_corrupt_message_dropped_silently() {
        let mut ring: FrameRing<5> = FrameRing::new();
        ring.begin_write(None).unwrap();
        ring.append_byte(0x21).unwrap();
        ring.append_byte(0x24).unwrap();
        assert_eq!(ring.append_byte(0xFF), Err(FrameError::InvalidChecksum));
        assert!(ring.is_empty());
        assert!(!ring.write_in_progress());

        // The next message assembles normally
        feed_all(&mut ring, &frame(0x21, &[0x24]));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_abort_write() {
        let mut ring: FrameRing<5> = FrameRing::new();
        ring.begin_write(None).unwrap();
        ring.append_byte(0xE4).unwrap();
        ring.abort_write();
        assert!(ring.is_empty());

        feed_all(&mut ring, &frame(0x80, &[]));
        assert_eq!(ring.try_read(), Some(frame(0x80, &[])));
    }

    #[test]
    fn test_interleaved_wraparound() {
        let mut ring: FrameRing<5> = FrameRing::new();
        // Push/pop more frames than the capacity to exercise wrapping
        for i in 0..23u8 {
            ring.push(frame(0x21, &[i])).unwrap();
            assert_eq!(ring.try_read(), Some(frame(0x21, &[i])));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_empty_cycles_keep_order() {
        let mut ring: FrameRing<5> = FrameRing::new();
        // Fill to capacity and drain repeatedly; the indices land on
        // every slot offset
        for round in 0..7u8 {
            for i in 0..5u8 {
                ring.push(frame(0x22, &[round, i])).unwrap();
            }
            assert!(ring.is_full());
            for i in 0..5u8 {
                assert_eq!(ring.try_read(), Some(frame(0x22, &[round, i])));
            }
            assert!(ring.is_empty());
            // Stagger the start slot for the next round
            ring.push(frame(0x80, &[])).unwrap();
            assert_eq!(ring.try_read(), Some(frame(0x80, &[])));
        }
    }

    #[test]
    fn test_call_byte_not_attached_to_pushed_frames() {
        let mut ring: FrameRing<5> = FrameRing::new();
        let call = CallByte::new(CallClass::Message, 4);
        ring.push(Frame::directed(call, 0x61, &[0x01]).unwrap())
            .unwrap();
        assert_eq!(ring.try_read().unwrap().call_byte, Some(call));
    }
}
