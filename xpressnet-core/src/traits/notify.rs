//! Application notification surface
//!
//! One method per decoded bus event, every one with a no-op default, so
//! an application implements only what it cares about. Internal
//! bookkeeping (slot table, power cache, replies) happens whether or not
//! a method is overridden.

use xpressnet_protocol::{PowerState, SpeedSteps};

/// Callbacks invoked by the dispatcher, all optional
#[allow(unused_variables)]
pub trait Notifications {
    /// Bus power/operational state changed
    fn power_changed(&mut self, power: PowerState) {}

    /// A device asks for locomotive info; answer with
    /// [`Station::set_loco_info`](crate::Station::set_loco_info)
    fn loco_info_requested(&mut self, slot: u8, address: u16) {}

    /// A device asks for momentary-function status; answer with
    /// [`Station::set_function_status`](crate::Station::set_function_status)
    fn loco_function_requested(&mut self, slot: u8, address: u16) {}

    /// A device asks for F13–F28 levels; answer with
    /// [`Station::set_loco_info_extended`](crate::Station::set_loco_info_extended)
    fn loco_function_levels_requested(&mut self, slot: u8, address: u16) {}

    /// Drive command, 14 speed steps (raw speed byte, direction in bit 7)
    fn loco_drive_14(&mut self, address: u16, speed: u8) {}

    /// Drive command, 27 speed steps
    fn loco_drive_27(&mut self, address: u16, speed: u8) {}

    /// Drive command, 28 speed steps
    fn loco_drive_28(&mut self, address: u16, speed: u8) {}

    /// Drive command, 128 speed steps
    fn loco_drive_128(&mut self, address: u16, speed: u8) {}

    /// Function group 1: `0 0 0 F0 F4 F3 F2 F1`
    fn loco_function_group_1(&mut self, address: u16, bits: u8) {}

    /// Function group 2: `0 0 0 0 F8 F7 F6 F5`
    fn loco_function_group_2(&mut self, address: u16, bits: u8) {}

    /// Function group 3: `0 0 0 0 F12 F11 F10 F9`
    fn loco_function_group_3(&mut self, address: u16, bits: u8) {}

    /// Function groups 4 and up (group 4: F20…F13, group 5: F28…F21)
    fn loco_function_group(&mut self, address: u16, group: u8, bits: u8) {}

    /// Turnout/accessory status request; answer with
    /// [`Station::set_turnout_status`](crate::Station::set_turnout_status)
    fn turnout_info_requested(&mut self, slot: u8, address: u8, nibble: u8) {}

    /// Turnout/accessory operation request
    fn turnout_command(&mut self, address: u16, output: u8, activate: bool) {}

    /// Feedback broadcast payload
    fn feedback(&mut self, address: u8, data: u8) {}

    /// Direct-mode CV read requested; the value is supplied later via
    /// [`Station::set_cv_read_value`](crate::Station::set_cv_read_value)
    /// or one of the nack pushes
    fn cv_read_requested(&mut self, cv: u16) {}

    /// Direct-mode CV write on the programming track
    fn cv_write(&mut self, cv: u16, value: u8) {}

    /// Programming-on-main byte write
    fn pom_write_byte(&mut self, address: u16, cv: u16, value: u8) {}

    /// Programming-on-main bit write
    fn pom_write_bit(&mut self, address: u16, cv: u16, value: u8) {}

    /// Reply to an own locomotive info request arrived (slave mode)
    fn loco_info_received(
        &mut self,
        address: u16,
        steps: SpeedSteps,
        busy: bool,
        speed: u8,
        f0: u8,
        f1: u8,
    ) {
    }

    /// Reply to an own function status request arrived (slave mode)
    fn loco_function_status_received(&mut self, address: u16, f4: u8, f5: u8) {}

    /// Service-mode CV result arrived (slave mode)
    fn service_result_received(&mut self, cv: u16, value: u8) {}
}

/// No notifications at all
impl Notifications for () {}
