//! Board-agnostic XpressNet bus engine
//!
//! This crate contains everything above the byte transport and below the
//! application:
//!
//! - Hardware abstraction traits (bus port, clock, notifications)
//! - Frame ring buffers decoupling interrupt-time reception from polling
//! - The bus arbitration state machine (master cycle, slave fallback)
//! - The command dispatcher and locomotive slot table
//! - The `Station` facade tying it all together
//!
//! The engine never blocks and never allocates: one `Station::poll` call
//! advances the state machine by at most one inbound message and one
//! transmission window.

#![no_std]
#![deny(unsafe_code)]

pub mod arbiter;
pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod slots;
pub mod station;
pub mod traits;

pub use arbiter::Role;
pub use config::StationConfig;
pub use slots::Claim;
pub use station::{Station, StationError};
pub use traits::{BusPort, Clock, Direction, Notifications};

// Re-export the wire types the public API speaks in
pub use xpressnet_protocol::{CallByte, Frame, PowerState, SpeedSteps};
