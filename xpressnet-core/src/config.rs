//! Engine configuration
//!
//! Timing values vary with the transceiver hardware (hardware UARTs get
//! by with a much shorter transmission window than software serial), so
//! they are configuration rather than constants. The defaults are the
//! values proven on hardware-serial RS485 transceivers.

use xpressnet_protocol::callbyte::DEVICE_ADDRESS_MAX;
use xpressnet_protocol::SpeedSteps;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Depth of the RX and TX frame ring buffers
pub const BUFFER_DEPTH: usize = 5;

/// Default transmission window in microseconds
pub const DEFAULT_WINDOW_US: u32 = 500;

/// Default number of silent polling cycles before a slave takes over
pub const DEFAULT_SLAVE_CYCLE_LIMIT: u8 = 255;

/// Default own device address in slave mode
pub const DEFAULT_DEVICE_ADDRESS: u8 = 31;

/// Station configuration, fixed at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StationConfig {
    /// Speed-step variant assumed for locos with no better information
    pub default_steps: SpeedSteps,
    /// Automatic master/slave role switching; off means slave-only
    pub auto_mode: bool,
    /// Own bus address when acting as a slave (1..=31)
    pub device_address: u8,
    /// How long an addressed device may take to start its reply, in µs
    pub transmission_window_us: u32,
    /// Silent cycles tolerated in slave mode before reclaiming mastership
    pub slave_cycle_limit: u8,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            default_steps: SpeedSteps::Steps28,
            auto_mode: true,
            device_address: DEFAULT_DEVICE_ADDRESS,
            transmission_window_us: DEFAULT_WINDOW_US,
            slave_cycle_limit: DEFAULT_SLAVE_CYCLE_LIMIT,
        }
    }
}

impl StationConfig {
    /// Clamp out-of-range fields to protocol limits
    pub fn sanitized(mut self) -> Self {
        if self.device_address == 0 || self.device_address > DEVICE_ADDRESS_MAX {
            self.device_address = DEFAULT_DEVICE_ADDRESS;
        }
        if self.slave_cycle_limit == 0 {
            self.slave_cycle_limit = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_limits() {
        let config = StationConfig::default();
        assert!(config.device_address <= DEVICE_ADDRESS_MAX);
        assert_eq!(config.transmission_window_us, 500);
        assert_eq!(config.slave_cycle_limit, 255);
    }

    #[test]
    fn test_sanitize_rejects_invalid_address() {
        let config = StationConfig {
            device_address: 0,
            ..Default::default()
        };
        assert_eq!(config.sanitized().device_address, DEFAULT_DEVICE_ADDRESS);

        let config = StationConfig {
            device_address: 40,
            ..Default::default()
        };
        assert_eq!(config.sanitized().device_address, DEFAULT_DEVICE_ADDRESS);
    }
}
