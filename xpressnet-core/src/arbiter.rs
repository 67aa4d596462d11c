//! Bus arbitration
//!
//! Decides who drives the line. The role state machine is explicit,
//! finite, and deterministic; all transitions happen in the poll context.
//!
//! With automatic mode switching enabled the station boots straight into
//! master and starts polling. Seeing a call byte it did not generate
//! means another master is alive, so it yields and falls back to slave.
//! A slave that hears no call byte for the configured number of cycles
//! assumes the master is gone and takes the bus back.

use xpressnet_protocol::callbyte::{CallByte, CallClass, DEVICE_ADDRESS_MAX};

/// Bus role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Not yet on the bus
    Idle,
    /// Driving the line: emitting call bytes, granting windows
    Master,
    /// Yielded mastership, initialization sequence not yet sent
    SlaveInitializing,
    /// Polled device: answering when granted a window
    Slave,
}

/// Events driving role transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RoleEvent {
    /// Setup finished, bus attached
    Attached,
    /// A call byte not generated locally was observed
    ForeignCallByte,
    /// The slave initialization sequence went out
    InitSent,
    /// No call byte for the configured number of cycles
    SilenceLimit,
}

impl Role {
    /// Process an event and return the next role
    ///
    /// `auto_mode` gates every transition that changes who masters the
    /// bus; without it the station stays a slave forever.
    pub fn transition(self, event: RoleEvent, auto_mode: bool) -> Self {
        use Role::*;
        use RoleEvent::*;

        match (self, event) {
            (Idle, Attached) => {
                if auto_mode {
                    Master
                } else {
                    SlaveInitializing
                }
            }
            (Master, ForeignCallByte) => {
                if auto_mode {
                    SlaveInitializing
                } else {
                    Master
                }
            }
            (SlaveInitializing, InitSent) => Slave,
            (SlaveInitializing, SilenceLimit) | (Slave, SilenceLimit) => {
                if auto_mode {
                    Master
                } else {
                    self
                }
            }
            // Default: stay in current role
            _ => self,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }
}

/// Role state machine plus master-cycle bookkeeping
#[derive(Debug)]
pub struct Arbiter {
    role: Role,
    auto_mode: bool,
    /// Address the master cycle polled last (wraps 1..=31)
    poll_address: u8,
    /// Consecutive silent cycles seen in slave mode
    silent_cycles: u8,
    silence_limit: u8,
}

impl Arbiter {
    pub fn new(auto_mode: bool, silence_limit: u8) -> Self {
        let mut arbiter = Self {
            role: Role::Idle,
            auto_mode,
            poll_address: 0,
            silent_cycles: 0,
            silence_limit,
        };
        arbiter.apply(RoleEvent::Attached);
        arbiter
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role.is_master()
    }

    /// Device address the current transmission window belongs to
    pub fn polled_address(&self) -> u8 {
        self.poll_address
    }

    /// Advance the poll cycle and produce the next inquiry call byte
    pub fn next_poll(&mut self) -> CallByte {
        self.poll_address += 1;
        if self.poll_address > DEVICE_ADDRESS_MAX {
            self.poll_address = 1;
        }
        CallByte::new(CallClass::Inquiry, self.poll_address)
    }

    /// Directed-ops token for the device owning the current window
    pub fn directed_ops(&self) -> CallByte {
        CallByte::new(CallClass::Message, self.poll_address)
    }

    /// A foreign master was heard; returns true if the role changed
    pub fn on_foreign_call_byte(&mut self) -> bool {
        let before = self.role;
        self.apply(RoleEvent::ForeignCallByte);
        self.silent_cycles = 0;
        before != self.role
    }

    /// Any call byte was observed while slaving; resets the silence count
    pub fn on_call_byte_observed(&mut self) {
        self.silent_cycles = 0;
    }

    /// One transmission window elapsed without a call byte (slave side)
    ///
    /// Returns true when the silence bound was hit and the station took
    /// the master role back.
    pub fn on_silent_cycle(&mut self) -> bool {
        if self.role == Role::Master {
            return false;
        }
        self.silent_cycles = self.silent_cycles.saturating_add(1);
        if self.silent_cycles < self.silence_limit {
            return false;
        }
        self.silent_cycles = 0;
        let before = self.role;
        self.apply(RoleEvent::SilenceLimit);
        before != self.role
    }

    /// The slave initialization sequence was handed to the transport
    pub fn on_init_sent(&mut self) {
        self.apply(RoleEvent::InitSent);
    }

    fn apply(&mut self, event: RoleEvent) {
        self.role = self.role.transition(event, self.auto_mode);
    }
}
