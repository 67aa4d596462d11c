//! XpressNet wire format
//!
//! This crate defines the byte-level protocol spoken on the XpressNet bus
//! (V3.6 with V4.0 extensions): a half-duplex multi-drop serial line on
//! which one master grants transmission windows to up to 31 devices.
//!
//! # Wire format
//!
//! Every transmission is at most 10 bytes:
//! ```text
//! ┌──────────┬────────┬─────────────┬──────────┐
//! │ CALLBYTE │ HEADER │ DATA        │ CHECKSUM │
//! │ 0–1B     │ 1B     │ 0–7B        │ 1B       │
//! └──────────┴────────┴─────────────┴──────────┘
//! ```
//!
//! The call byte is only present on master transmissions (it is the token
//! granting the bus to a device) and is excluded from the checksum. The
//! header's low nibble carries the number of data bytes that follow; the
//! checksum is the XOR of header and data.

#![no_std]
#![deny(unsafe_code)]

pub mod callbyte;
pub mod frame;
pub mod message;

pub use callbyte::{CallByte, CallClass, BROADCAST_ADDRESS, DEVICE_ADDRESS_MAX};
pub use frame::{Frame, FrameError, FrameAssembler, MAX_DATA_BYTES, MAX_FRAME_SIZE};
pub use message::{Request, Reply, PowerState, SpeedSteps};
