//! Typed messages: decoding inbound requests, building outbound replies
//!
//! Message types are divided into two categories:
//! - Device → master: control requests, info requests, programming ops
//! - Master → devices: replies, broadcasts, busy notices
//!
//! In slave mode the same decoder runs on master-originated traffic, so
//! broadcast and reply forms are decoded here as well.

use crate::callbyte::{CallByte, CallClass};
use crate::frame::{Frame, FrameError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// Header bytes (high nibble = class, low nibble = data-byte count)
pub const HDR_COMMON_REQUEST: u8 = 0x21;
pub const HDR_CV_READ: u8 = 0x22;
pub const HDR_CV_WRITE: u8 = 0x23;
pub const HDR_TURNOUT: u8 = 0x42;
pub const HDR_TURNOUT_COMMAND: u8 = 0x52;
pub const HDR_BROADCAST: u8 = 0x61;
pub const HDR_STATUS_REPLY: u8 = 0x62;
pub const HDR_SERVICE_REPLY: u8 = 0x63;
pub const HDR_ESTOP_REQUEST: u8 = 0x80;
pub const HDR_ESTOP_BROADCAST: u8 = 0x81;
pub const HDR_LOCO_3: u8 = 0xE3;
pub const HDR_LOCO_4: u8 = 0xE4;
pub const HDR_LOCO_6: u8 = 0xE6;
pub const HDR_LOCO_EXTENDED: u8 = 0xE7;

/// Protocol version reported in the version reply
pub const PROTOCOL_VERSION: u8 = 0x40;

/// Command-station ID reported in the version reply (MultiMaus class)
pub const STATION_ID: u8 = 0x10;

/// Locomotive addresses from here up are "long" on the wire
const LONG_ADDRESS_MIN: u16 = 100;

/// Bus-wide operational state, broadcast to all devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PowerState {
    /// Normal operation resumed
    #[default]
    Normal,
    /// Emergency stop: locos halted, track still powered
    EmergencyStop,
    /// Track voltage switched off
    TrackVoltageOff,
    /// Short circuit detected
    ShortCircuit,
    /// Service (programming) mode active
    ServiceMode,
}

impl PowerState {
    /// Status bits as carried in the status reply
    pub fn to_byte(self) -> u8 {
        match self {
            PowerState::Normal => 0x00,
            PowerState::EmergencyStop => 0x01,
            PowerState::TrackVoltageOff => 0x02,
            PowerState::ShortCircuit => 0x04,
            PowerState::ServiceMode => 0x08,
        }
    }

    /// Decode a status bitmask; the most severe set bit wins
    pub fn from_byte(byte: u8) -> Self {
        if byte & 0x08 != 0 {
            PowerState::ServiceMode
        } else if byte & 0x04 != 0 {
            PowerState::ShortCircuit
        } else if byte & 0x02 != 0 {
            PowerState::TrackVoltageOff
        } else if byte & 0x01 != 0 {
            PowerState::EmergencyStop
        } else {
            PowerState::Normal
        }
    }
}

/// Locomotive speed-step variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SpeedSteps {
    Steps14,
    Steps27,
    #[default]
    Steps28,
    Steps128,
}

impl SpeedSteps {
    /// The FFF identification code used in info replies
    pub fn code(self) -> u8 {
        match self {
            SpeedSteps::Steps14 => 0x00,
            SpeedSteps::Steps27 => 0x01,
            SpeedSteps::Steps28 => 0x02,
            SpeedSteps::Steps128 => 0x04,
        }
    }

    /// Decode the FFF identification code
    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x07 {
            0x00 => Some(SpeedSteps::Steps14),
            0x01 => Some(SpeedSteps::Steps27),
            0x02 => Some(SpeedSteps::Steps28),
            0x04 => Some(SpeedSteps::Steps128),
            _ => None,
        }
    }
}

/// Split a 14-bit locomotive address into wire bytes
///
/// Long addresses carry the two marker bits in the high byte.
pub fn encode_loco_address(address: u16) -> (u8, u8) {
    if address >= LONG_ADDRESS_MIN {
        ((((address >> 8) as u8) & 0x3F) | 0xC0, address as u8)
    } else {
        (0, address as u8)
    }
}

/// Rebuild a locomotive address from its wire bytes
pub fn decode_loco_address(high: u8, low: u8) -> u16 {
    (u16::from(high & 0x3F) << 8) | u16::from(low)
}

/// Operations decoded from a checksum-validated inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// Software version request
    Version,
    /// Command-station status request
    Status,
    /// Track power off request
    PowerOff,
    /// Resume operations request
    PowerOn,
    /// Emergency stop request
    EmergencyStop,
    /// Service-mode results request
    ServiceResults,
    /// Direct-mode CV read on the programming track
    DirectCvRead { cv: u16 },
    /// Direct-mode CV write on the programming track
    DirectCvWrite { cv: u16, value: u8 },
    /// Locomotive info request
    LocoInfoRequest { address: u16 },
    /// Locomotive function status request (F0–F12 momentary bits)
    FunctionStatusRequest { address: u16 },
    /// Locomotive function level request (F13–F28)
    FunctionLevelRequest { address: u16 },
    /// Locomotive drive command; speed byte is raw (direction bit included)
    Drive {
        address: u16,
        steps: SpeedSteps,
        speed: u8,
    },
    /// Locomotive function group command (groups 1–5)
    Functions { address: u16, group: u8, bits: u8 },
    /// Programming-on-main CV byte write
    PomWriteByte { address: u16, cv: u16, value: u8 },
    /// Programming-on-main CV bit write
    PomWriteBit { address: u16, cv: u16, value: u8 },
    /// Turnout/accessory status request
    TurnoutInfoRequest { address: u8, nibble: u8 },
    /// Turnout/accessory operation request
    TurnoutCommand {
        address: u16,
        output: u8,
        activate: bool,
    },
    /// Feedback broadcast payload (arrives under the feedback call byte)
    Feedback { address: u8, data: u8 },
    /// Power-state broadcast from an acting master (slave mode)
    PowerBroadcast { power: PowerState },
    /// Status reply from an acting master (slave mode)
    StatusReply { power: PowerState },
    /// Locomotive info reply from an acting master (slave mode)
    LocoInfoReply {
        steps: SpeedSteps,
        busy: bool,
        speed: u8,
        f0: u8,
        f1: u8,
    },
    /// Function status reply from an acting master (slave mode)
    FunctionStatusReply { f4: u8, f5: u8 },
    /// Service-mode result from an acting master (slave mode)
    ServiceResult { cv: u16, value: u8 },
    /// Header/identifier combination this implementation does not know
    Unknown { header: u8 },
}

impl Request {
    /// Decode a validated frame
    ///
    /// The frame's call byte disambiguates the `0x42` header, which is
    /// shared between turnout traffic and feedback broadcasts.
    pub fn from_frame(frame: &Frame) -> Self {
        let data = &frame.data;
        match frame.header {
            HDR_COMMON_REQUEST if !data.is_empty() => match data[0] {
                0x21 => Request::Version,
                0x24 => Request::Status,
                0x80 => Request::PowerOff,
                0x81 => Request::PowerOn,
                0x10 => Request::ServiceResults,
                _ => Request::Unknown { header: frame.header },
            },
            HDR_ESTOP_REQUEST => Request::EmergencyStop,
            HDR_CV_READ if data.len() == 2 && data[0] == 0x15 => Request::DirectCvRead {
                cv: cv_from_byte(data[1]),
            },
            HDR_CV_WRITE if data.len() == 3 && data[0] == 0x16 => Request::DirectCvWrite {
                cv: cv_from_byte(data[1]),
                value: data[2],
            },
            HDR_LOCO_3 if data.len() == 3 => {
                let address = decode_loco_address(data[1], data[2]);
                match data[0] {
                    0x00 => Request::LocoInfoRequest { address },
                    0x07 => Request::FunctionStatusRequest { address },
                    0x08 => Request::FunctionLevelRequest { address },
                    0x50 => Request::FunctionStatusReply {
                        f4: data[1],
                        f5: data[2],
                    },
                    _ => Request::Unknown { header: frame.header },
                }
            }
            HDR_LOCO_4 if data.len() == 4 => {
                let address = decode_loco_address(data[1], data[2]);
                match data[0] {
                    0x10..=0x13 => Request::Drive {
                        address,
                        steps: match data[0] {
                            0x10 => SpeedSteps::Steps14,
                            0x11 => SpeedSteps::Steps27,
                            0x12 => SpeedSteps::Steps28,
                            _ => SpeedSteps::Steps128,
                        },
                        speed: data[3],
                    },
                    0x20..=0x23 => Request::Functions {
                        address,
                        group: data[0] - 0x20 + 1,
                        bits: data[3],
                    },
                    0x28 => Request::Functions {
                        address,
                        group: 5,
                        bits: data[3],
                    },
                    // MultiMaus variant of the group-4 command
                    0xF3 => Request::Functions {
                        address,
                        group: 4,
                        bits: data[3],
                    },
                    id if id & 0xF0 == 0x00 => match SpeedSteps::from_code(id) {
                        Some(steps) => Request::LocoInfoReply {
                            steps,
                            busy: id & 0x08 != 0,
                            speed: data[1],
                            f0: data[2],
                            f1: data[3],
                        },
                        None => Request::Unknown { header: frame.header },
                    },
                    _ => Request::Unknown { header: frame.header },
                }
            }
            HDR_LOCO_6 if data.len() == 6 && data[0] == 0x30 => {
                let address = decode_loco_address(data[1], data[2]);
                let cv = (u16::from(data[3] & 0x03) << 8 | u16::from(data[4])) + 1;
                match data[3] & 0xFC {
                    0xEC => Request::PomWriteByte {
                        address,
                        cv,
                        value: data[5],
                    },
                    0xE8 => Request::PomWriteBit {
                        address,
                        cv,
                        value: data[5],
                    },
                    _ => Request::Unknown { header: frame.header },
                }
            }
            HDR_TURNOUT if data.len() == 2 => {
                let feedback_call = frame
                    .call_byte
                    .is_some_and(|c| c.class() == CallClass::FeedbackBroadcast);
                // Info requests set bit 7 of the second byte; feedback
                // payloads from modules leave it clear
                if feedback_call || data[1] & 0x80 == 0 {
                    Request::Feedback {
                        address: data[0],
                        data: data[1],
                    }
                } else {
                    Request::TurnoutInfoRequest {
                        address: data[0],
                        nibble: data[1] & 0x01,
                    }
                }
            }
            HDR_TURNOUT_COMMAND if data.len() == 2 => Request::TurnoutCommand {
                address: u16::from(data[0]) * 4 + u16::from((data[1] >> 1) & 0x03),
                output: data[1] & 0x01,
                activate: data[1] & 0x08 != 0,
            },
            HDR_BROADCAST if !data.is_empty() => {
                let power = match data[0] {
                    0x00 => PowerState::TrackVoltageOff,
                    0x01 => PowerState::Normal,
                    0x02 => PowerState::ServiceMode,
                    0x12 => PowerState::ShortCircuit,
                    _ => return Request::Unknown { header: frame.header },
                };
                Request::PowerBroadcast { power }
            }
            HDR_ESTOP_BROADCAST => Request::PowerBroadcast {
                power: PowerState::EmergencyStop,
            },
            HDR_STATUS_REPLY if data.len() == 2 && data[0] == 0x22 => Request::StatusReply {
                power: PowerState::from_byte(data[1]),
            },
            HDR_SERVICE_REPLY if data.len() == 3 && data[0] == 0x14 => Request::ServiceResult {
                cv: cv_from_byte(data[1]),
                value: data[2],
            },
            _ => Request::Unknown { header: frame.header },
        }
    }
}

/// Outbound messages built by the engine or the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// Software version and station ID
    Version,
    /// Command-station status
    Status { power: PowerState },
    /// Power-state change broadcast
    PowerBroadcast { power: PowerState },
    /// "Locomotive operated by another device" notice
    Busy { address: u16 },
    /// Locomotive info
    LocoInfo {
        steps: SpeedSteps,
        busy: bool,
        speed: u8,
        f0: u8,
        f1: u8,
    },
    /// Extended locomotive info (F0–F28, MultiMaus)
    LocoInfoExtended {
        steps: SpeedSteps,
        busy: bool,
        speed: u8,
        f0: u8,
        f1: u8,
        f2: u8,
        f3: u8,
    },
    /// Locomotive function status (momentary bits)
    FunctionStatus { f4: u8, f5: u8 },
    /// Turnout/accessory status
    TurnoutStatus { address: u8, data: u8 },
    /// Feedback data for all devices
    Feedback { data1: u8, data2: u8 },
    /// Service-mode CV read result
    ServiceResult { cv: u16, value: u8 },
    /// Service mode: no acknowledgement from the decoder
    CvNack,
    /// Service mode: short circuit on the programming track
    CvNackShortCircuit,
    /// Instruction not supported
    NotSupported,
    /// Fixed answer to an acknowledgement-request call byte
    Ack,
    /// Locomotive info request (device side)
    LocoInfoRequest { address: u16 },
    /// Locomotive function status request (device side)
    FunctionStatusRequest { address: u16 },
    /// Command-station status request (device side)
    StatusRequest,
    /// Track power off request (device side)
    PowerOffRequest,
    /// Resume operations request (device side)
    PowerOnRequest,
    /// Emergency stop request (device side)
    EmergencyStopRequest,
    /// Locomotive drive command (device side)
    Drive {
        address: u16,
        steps: SpeedSteps,
        speed: u8,
    },
    /// Locomotive function group command (device side)
    Functions { address: u16, group: u8, bits: u8 },
}

impl Reply {
    /// Encode into a frame, attaching the call byte the sender chose
    ///
    /// Device-side transmissions pass `None`; master transmissions pass
    /// the directed-ops or broadcast token for the target.
    pub fn to_frame(&self, call_byte: Option<CallByte>) -> Frame {
        let frame = match *self {
            Reply::Version => Frame::new(HDR_SERVICE_REPLY, &[0x21, PROTOCOL_VERSION, STATION_ID]),
            Reply::Status { power } => Frame::new(HDR_STATUS_REPLY, &[0x22, power.to_byte()]),
            Reply::PowerBroadcast { power } => match power {
                PowerState::Normal => Frame::new(HDR_BROADCAST, &[0x01]),
                PowerState::TrackVoltageOff => Frame::new(HDR_BROADCAST, &[0x00]),
                PowerState::ShortCircuit => Frame::new(HDR_BROADCAST, &[0x12]),
                PowerState::ServiceMode => Frame::new(HDR_BROADCAST, &[0x02]),
                PowerState::EmergencyStop => Frame::new(HDR_ESTOP_BROADCAST, &[0x00]),
            },
            Reply::Busy { address } => {
                let (high, low) = encode_loco_address(address);
                Frame::new(HDR_LOCO_3, &[0x40, high, low])
            }
            Reply::LocoInfo {
                steps,
                busy,
                speed,
                f0,
                f1,
            } => Frame::new(
                HDR_LOCO_4,
                &[steps.code() | if busy { 0x08 } else { 0x00 }, speed, f0, f1],
            ),
            Reply::LocoInfoExtended {
                steps,
                busy,
                speed,
                f0,
                f1,
                f2,
                f3,
            } => Frame::new(
                HDR_LOCO_EXTENDED,
                &[
                    steps.code() | if busy { 0x08 } else { 0x00 },
                    speed,
                    f0,
                    f1,
                    f2,
                    f3,
                    0x00,
                ],
            ),
            Reply::FunctionStatus { f4, f5 } => Frame::new(HDR_LOCO_3, &[0x50, f4, f5]),
            Reply::TurnoutStatus { address, data } => Frame::new(HDR_TURNOUT, &[address, data]),
            Reply::Feedback { data1, data2 } => Frame::new(HDR_TURNOUT, &[data1, data2]),
            Reply::ServiceResult { cv, value } => {
                Frame::new(HDR_SERVICE_REPLY, &[0x14, cv_to_byte(cv), value])
            }
            Reply::CvNack => Frame::new(HDR_BROADCAST, &[0x13]),
            Reply::CvNackShortCircuit => Frame::new(HDR_BROADCAST, &[0x12]),
            Reply::NotSupported => Frame::new(HDR_BROADCAST, &[0x82]),
            Reply::Ack => Frame::new(0x20, &[]),
            Reply::LocoInfoRequest { address } => {
                let (high, low) = encode_loco_address(address);
                Frame::new(HDR_LOCO_3, &[0x00, high, low])
            }
            Reply::FunctionStatusRequest { address } => {
                let (high, low) = encode_loco_address(address);
                Frame::new(HDR_LOCO_3, &[0x07, high, low])
            }
            Reply::StatusRequest => Frame::new(HDR_COMMON_REQUEST, &[0x24]),
            Reply::PowerOffRequest => Frame::new(HDR_COMMON_REQUEST, &[0x80]),
            Reply::PowerOnRequest => Frame::new(HDR_COMMON_REQUEST, &[0x81]),
            Reply::EmergencyStopRequest => Frame::new(HDR_ESTOP_REQUEST, &[]),
            Reply::Drive {
                address,
                steps,
                speed,
            } => {
                let (high, low) = encode_loco_address(address);
                let id = match steps {
                    SpeedSteps::Steps14 => 0x10,
                    SpeedSteps::Steps27 => 0x11,
                    SpeedSteps::Steps28 => 0x12,
                    SpeedSteps::Steps128 => 0x13,
                };
                Frame::new(HDR_LOCO_4, &[id, high, low, speed])
            }
            Reply::Functions {
                address,
                group,
                bits,
            } => {
                let (high, low) = encode_loco_address(address);
                let id = match group {
                    1 => 0x20,
                    2 => 0x21,
                    3 => 0x22,
                    4 => 0x23,
                    _ => 0x28,
                };
                Frame::new(HDR_LOCO_4, &[id, high, low, bits])
            }
        };
        // Data counts above are all within bounds
        let mut frame = frame.unwrap_or_else(|_| Frame {
            call_byte: None,
            header: 0,
            data: heapless::Vec::new(),
        });
        frame.call_byte = call_byte;
        frame
    }
}

/// Service-mode CV addresses are 1-based; 0 on the wire means 256
fn cv_from_byte(byte: u8) -> u16 {
    if byte == 0 {
        256
    } else {
        u16::from(byte)
    }
}

fn cv_to_byte(cv: u16) -> u8 {
    if cv >= 256 {
        0
    } else {
        cv as u8
    }
}
