//! Hardware abstraction traits
//!
//! These traits define the interface between the bus engine and the
//! platform: the half-duplex serial port, the microsecond clock, and the
//! notification surface through which decoded bus events reach the
//! application.

pub mod bus;
pub mod notify;
pub mod time;

pub use bus::{BusPort, Direction};
pub use notify::Notifications;
pub use time::Clock;
