//! The station facade
//!
//! `Station` ties the arbiter, the ring buffers and the dispatcher to a
//! concrete bus port, clock and notification sink. It is driven from two
//! contexts:
//!
//! - `receive_byte` from the UART receive interrupt, one byte at a time
//! - `poll` from the main loop, advancing timing and dispatch
//!
//! The port implementation is expected to suppress local echo: bytes the
//! station transmits itself must not be fed back into `receive_byte`.

use xpressnet_protocol::callbyte::{CallByte, CallClass, GENERAL_BROADCAST};
use xpressnet_protocol::message::Reply;
use xpressnet_protocol::{Frame, PowerState, SpeedSteps, MAX_FRAME_SIZE};

use crate::arbiter::{Arbiter, Role};
use crate::buffer::FrameRing;
use crate::config::{StationConfig, BUFFER_DEPTH};
use crate::dispatch::Dispatcher;
use crate::slots::Claim;
use crate::traits::time::elapsed_us;
use crate::traits::{BusPort, Clock, Direction, Notifications};

/// Errors reported by the public API
///
/// Transport errors surface from [`Station::poll`] instead, typed by the
/// port implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StationError {
    /// The outbound buffer has no free slot
    TxFull,
    /// A request of the same kind is still awaiting its answer
    RequestPending,
    /// The locomotive is controlled by another device
    LocoBusy,
    /// The operation needs the other bus role
    WrongRole,
    /// The protocol has no wire form for this operation
    Unsupported,
}

/// One XpressNet bus station, master-capable
pub struct Station<B, C, N>
where
    B: BusPort,
    C: Clock,
    N: Notifications,
{
    config: StationConfig,
    bus: B,
    clock: C,
    notify: N,
    arbiter: Arbiter,
    dispatcher: Dispatcher,
    rx: FrameRing<BUFFER_DEPTH>,
    tx: FrameRing<BUFFER_DEPTH>,
    /// Start of the current transmission window
    window_start: u32,
    /// Slave side: an inquiry granted us the current window
    window_granted: bool,
    /// Slave side: an acknowledgement answer is owed
    ack_owed: bool,
}

impl<B, C, N> Station<B, C, N>
where
    B: BusPort,
    C: Clock,
    N: Notifications,
{
    /// Attach to the bus
    ///
    /// With `auto_mode` set the station starts polling as master right
    /// away; otherwise it waits to be polled. The port should be in
    /// receive direction when handed over.
    pub fn new(config: StationConfig, bus: B, clock: C, notify: N) -> Self {
        let config = config.sanitized();
        let window_start = clock.micros();
        Self {
            arbiter: Arbiter::new(config.auto_mode, config.slave_cycle_limit),
            dispatcher: Dispatcher::new(),
            rx: FrameRing::new(),
            tx: FrameRing::new(),
            window_start,
            window_granted: false,
            ack_owed: false,
            config,
            bus,
            clock,
            notify,
        }
    }

    pub fn role(&self) -> Role {
        self.arbiter.role()
    }

    pub fn is_master(&self) -> bool {
        self.arbiter.is_master()
    }

    /// Cached bus-wide operational state
    pub fn power_state(&self) -> PowerState {
        self.dispatcher.power()
    }

    pub fn notifications(&mut self) -> &mut N {
        &mut self.notify
    }

    /// Feed one received byte from the interrupt context
    ///
    /// `is_call_byte` reflects the ninth wire bit. Corrupt bytes and
    /// overflow are handled by dropping the affected message; the sender
    /// retries on its own timeout.
    pub fn receive_byte(&mut self, byte: u8, is_call_byte: bool) {
        if is_call_byte {
            self.receive_call_byte(byte);
            return;
        }
        if self.arbiter.is_master() && !self.rx.write_in_progress() {
            // First byte of a reply to the device we just polled
            let _ = self.rx.begin_write(None);
        }
        let _ = self.rx.append_byte(byte);
    }

    fn receive_call_byte(&mut self, byte: u8) {
        // A call byte is a message boundary; any partial message is dead
        if self.rx.write_in_progress() {
            self.rx.abort_write();
        }
        self.arbiter.on_call_byte_observed();
        if self.arbiter.is_master() {
            // Another master is alive
            self.arbiter.on_foreign_call_byte();
            return;
        }

        let call = CallByte::from_byte(byte);
        if !call.parity_ok() {
            return;
        }
        let us = self.config.device_address;
        match call.class() {
            CallClass::Inquiry if call.address() == us => {
                self.window_granted = true;
            }
            CallClass::AckRequest if call.address() == us => {
                self.ack_owed = true;
                self.window_granted = true;
            }
            CallClass::Message if call.is_broadcast() || call.address() == us => {
                let _ = self.rx.begin_write(Some(call));
            }
            CallClass::FeedbackBroadcast => {
                let _ = self.rx.begin_write(Some(call));
            }
            _ => {}
        }
    }

    /// Advance the engine by one step
    ///
    /// Dispatches at most one inbound message, then runs the timing of
    /// the current role: as master, closing the elapsed transmission
    /// window and opening the next one; as slave, answering a granted
    /// window and counting silent cycles.
    pub fn poll(&mut self) -> Result<(), B::Error> {
        if let Some(frame) = self.rx.try_read() {
            let origin = self.arbiter.polled_address();
            let is_master = self.arbiter.is_master();
            self.dispatcher
                .dispatch(&frame, origin, is_master, &mut self.tx, &mut self.notify);
        }

        let now = self.clock.micros();
        match self.arbiter.role() {
            Role::Master => self.master_window(now),
            Role::Slave | Role::SlaveInitializing => self.slave_window(now),
            Role::Idle => Ok(()),
        }
    }

    fn master_window(&mut self, now: u32) -> Result<(), B::Error> {
        let window = self.config.transmission_window_us;
        if elapsed_us(self.window_start, now) < window {
            return Ok(());
        }
        if self.rx.write_in_progress() {
            // A reply is still coming in; grant one extra window before
            // treating it as truncated
            if elapsed_us(self.window_start, now) < 2 * window {
                return Ok(());
            }
            self.rx.abort_write();
        }
        self.window_start = now;

        if let Some(mut frame) = self.tx.try_read() {
            if frame.call_byte.is_none() {
                frame.call_byte = Some(GENERAL_BROADCAST);
            }
            self.transmit(&frame)
        } else {
            let call = self.arbiter.next_poll();
            self.send_call(call)
        }
    }

    fn slave_window(&mut self, now: u32) -> Result<(), B::Error> {
        if self.window_granted {
            self.window_granted = false;
            self.window_start = now;
            if self.ack_owed {
                self.ack_owed = false;
                return self.transmit(&Reply::Ack.to_frame(None));
            }
            if self.arbiter.role() == Role::SlaveInitializing {
                let frame = Reply::StatusRequest.to_frame(None);
                self.transmit(&frame)?;
                self.arbiter.on_init_sent();
                return Ok(());
            }
            if let Some(mut frame) = self.tx.try_read() {
                // Call bytes are the master's token; a polled device
                // transmits bare frames
                frame.call_byte = None;
                return self.transmit(&frame);
            }
            return Ok(());
        }

        if elapsed_us(self.window_start, now) >= self.config.transmission_window_us {
            self.window_start = now;
            if self.arbiter.on_silent_cycle() {
                // Master is gone; our first own window starts now
                self.ack_owed = false;
            }
        }
        Ok(())
    }

    fn transmit(&mut self, frame: &Frame) -> Result<(), B::Error> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = match frame.encode(&mut buffer) {
            Ok(len) => len,
            // Cannot happen: frame data is bounded by construction
            Err(_) => return Ok(()),
        };
        self.bus.set_direction(Direction::Transmit)?;
        if frame.call_byte.is_some() {
            self.bus.send_call_byte(buffer[0])?;
            self.bus.send_data(&buffer[1..len])?;
        } else {
            self.bus.send_data(&buffer[..len])?;
        }
        self.bus.set_direction(Direction::Receive)
    }

    fn send_call(&mut self, call: CallByte) -> Result<(), B::Error> {
        self.bus.set_direction(Direction::Transmit)?;
        self.bus.send_call_byte(call.to_byte())?;
        self.bus.set_direction(Direction::Receive)
    }

    fn enqueue(&mut self, frame: Frame) -> Result<(), StationError> {
        self.tx.push(frame).map_err(|_| StationError::TxFull)
    }

    /// Claim a loco for the station's own slot (slot 0)
    fn claim_own(&mut self, address: u16) -> Result<(), StationError> {
        match self.dispatcher.slots_mut().claim(0, address) {
            Claim::Conflict { .. } => Err(StationError::LocoBusy),
            Claim::Granted | Claim::AlreadyHeld => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Power and status
    // ------------------------------------------------------------------

    /// Change the bus power state
    ///
    /// As master this broadcasts the change to every device; as slave it
    /// sends the matching request to the acting master (only off, on and
    /// emergency stop have a request form).
    pub fn set_power(&mut self, power: PowerState) -> Result<(), StationError> {
        if self.arbiter.is_master() {
            self.enqueue(Reply::PowerBroadcast { power }.to_frame(Some(GENERAL_BROADCAST)))?;
            self.dispatcher
                .change_power(power, false, &mut self.tx, &mut self.notify);
            Ok(())
        } else {
            let reply = match power {
                PowerState::TrackVoltageOff => Reply::PowerOffRequest,
                PowerState::Normal => Reply::PowerOnRequest,
                PowerState::EmergencyStop => Reply::EmergencyStopRequest,
                _ => return Err(StationError::Unsupported),
            };
            self.enqueue(reply.to_frame(None))
        }
    }

    /// Ask the acting master for its status (slave mode)
    pub fn request_status(&mut self) -> Result<(), StationError> {
        if self.arbiter.is_master() {
            return Err(StationError::WrongRole);
        }
        self.enqueue(Reply::StatusRequest.to_frame(None))
    }

    // ------------------------------------------------------------------
    // Locomotive control and info
    // ------------------------------------------------------------------

    /// Drive a locomotive from this station
    ///
    /// As master this claims the loco for the station's own slot (a loco
    /// held by another device is refused); the application generates the
    /// track signal itself. As slave the drive command goes to the
    /// acting master.
    pub fn set_speed(
        &mut self,
        address: u16,
        steps: SpeedSteps,
        speed: u8,
    ) -> Result<(), StationError> {
        if self.arbiter.is_master() {
            self.claim_own(address)
        } else {
            self.enqueue(
                Reply::Drive {
                    address,
                    steps,
                    speed,
                }
                .to_frame(None),
            )
        }
    }

    /// Set a function group (1–5) of a locomotive from this station
    pub fn set_functions(&mut self, address: u16, group: u8, bits: u8) -> Result<(), StationError> {
        if self.arbiter.is_master() {
            self.claim_own(address)
        } else {
            self.enqueue(
                Reply::Functions {
                    address,
                    group,
                    bits,
                }
                .to_frame(None),
            )
        }
    }

    /// Claim a locomotive for the station itself and tell everyone
    ///
    /// Other devices drop control of the address when they see the busy
    /// notice.
    pub fn request_loco_busy(&mut self, address: u16) -> Result<(), StationError> {
        self.enqueue(Reply::Busy { address }.to_frame(Some(GENERAL_BROADCAST)))?;
        self.dispatcher.slots_mut().claim(0, address);
        Ok(())
    }

    /// Tell a specific device that a locomotive is controlled elsewhere
    ///
    /// Also records the station's own claim so later info requests carry
    /// the busy flag.
    pub fn set_loco_busy(&mut self, slot: u8, address: u16) -> Result<(), StationError> {
        let call = CallByte::new(CallClass::Message, slot);
        self.enqueue(Reply::Busy { address }.to_frame(Some(call)))?;
        self.dispatcher.slots_mut().claim(0, address);
        Ok(())
    }

    /// Record that `slot` controls `address` without bus traffic
    pub fn claim_loco(&mut self, slot: u8, address: u16) -> Claim {
        self.dispatcher.slots_mut().claim(slot, address)
    }

    /// Drop the claim held by `slot`
    pub fn release_loco(&mut self, slot: u8) {
        self.dispatcher.slots_mut().release(slot);
    }

    /// Which slot controls `address`, if any
    pub fn loco_holder(&self, address: u16) -> Option<u8> {
        self.dispatcher.slots().holder(address)
    }

    /// Request info about a locomotive from the acting master (slave
    /// mode); the answer arrives via
    /// [`Notifications::loco_info_received`]
    pub fn get_loco_info(&mut self, address: u16) -> Result<(), StationError> {
        if self.arbiter.is_master() {
            return Err(StationError::WrongRole);
        }
        if self.tx.is_full() {
            return Err(StationError::TxFull);
        }
        if !self.dispatcher.begin_info_request(address) {
            return Err(StationError::RequestPending);
        }
        self.enqueue(Reply::LocoInfoRequest { address }.to_frame(None))
    }

    /// Request momentary-function status (slave mode); the answer arrives
    /// via [`Notifications::loco_function_status_received`]
    pub fn get_loco_function_status(&mut self, address: u16) -> Result<(), StationError> {
        if self.arbiter.is_master() {
            return Err(StationError::WrongRole);
        }
        if self.tx.is_full() {
            return Err(StationError::TxFull);
        }
        if !self.dispatcher.begin_function_request(address) {
            return Err(StationError::RequestPending);
        }
        self.enqueue(Reply::FunctionStatusRequest { address }.to_frame(None))
    }

    /// Answer a locomotive info request (master mode)
    ///
    /// `slot` is the device the request came from, as handed to
    /// [`Notifications::loco_info_requested`]. The busy flag is derived
    /// from the slot table.
    pub fn set_loco_info(
        &mut self,
        slot: u8,
        steps: SpeedSteps,
        speed: u8,
        f0: u8,
        f1: u8,
    ) -> Result<(), StationError> {
        let reply = self.dispatcher.loco_info_reply(slot, steps, speed, f0, f1);
        let call = CallByte::new(CallClass::Message, slot);
        self.enqueue(reply.to_frame(Some(call)))
    }

    /// Answer a function level request with F0–F28 (master mode)
    #[allow(clippy::too_many_arguments)]
    pub fn set_loco_info_extended(
        &mut self,
        slot: u8,
        steps: SpeedSteps,
        speed: u8,
        f0: u8,
        f1: u8,
        f2: u8,
        f3: u8,
    ) -> Result<(), StationError> {
        let reply = self
            .dispatcher
            .loco_info_extended_reply(slot, steps, speed, f0, f1, f2, f3);
        let call = CallByte::new(CallClass::Message, slot);
        self.enqueue(reply.to_frame(Some(call)))
    }

    /// Answer a momentary-function status request (master mode)
    pub fn set_function_status(&mut self, slot: u8, f4: u8, f5: u8) -> Result<(), StationError> {
        let call = CallByte::new(CallClass::Message, slot);
        self.enqueue(Reply::FunctionStatus { f4, f5 }.to_frame(Some(call)))
    }

    // ------------------------------------------------------------------
    // Turnouts and feedback
    // ------------------------------------------------------------------

    /// Answer a turnout status request (master mode)
    pub fn set_turnout_status(
        &mut self,
        slot: u8,
        address: u8,
        data: u8,
    ) -> Result<(), StationError> {
        let call = CallByte::new(CallClass::Message, slot);
        self.enqueue(Reply::TurnoutStatus { address, data }.to_frame(Some(call)))
    }

    /// Announce a turnout position change to every device (master mode)
    pub fn set_turnout_position(&mut self, address: u8, data: u8) -> Result<(), StationError> {
        self.enqueue(Reply::TurnoutStatus { address, data }.to_frame(Some(GENERAL_BROADCAST)))
    }

    /// Put feedback module data on the bus
    ///
    /// As master this is a feedback broadcast; as slave the data goes to
    /// the acting master, which relays it.
    pub fn send_feedback(&mut self, address: u8, data: u8) -> Result<(), StationError> {
        let call = if self.arbiter.is_master() {
            Some(xpressnet_protocol::callbyte::FEEDBACK_BROADCAST)
        } else {
            None
        };
        self.enqueue(
            Reply::Feedback {
                data1: address,
                data2: data,
            }
            .to_frame(call),
        )
    }

    // ------------------------------------------------------------------
    // Programming
    // ------------------------------------------------------------------

    /// Supply the value for the pending CV read (master mode)
    ///
    /// Sent to the requesting device right away and cached for later
    /// service-results requests.
    pub fn set_cv_read_value(&mut self, cv: u16, value: u8) {
        self.dispatcher
            .supply_cv_answer(Reply::ServiceResult { cv, value }, &mut self.tx);
    }

    /// Report that the decoder did not acknowledge (master mode)
    pub fn set_cv_nack(&mut self) {
        self.dispatcher.supply_cv_answer(Reply::CvNack, &mut self.tx);
    }

    /// Report a short circuit on the programming track (master mode)
    pub fn set_cv_nack_short_circuit(&mut self) {
        self.dispatcher
            .supply_cv_answer(Reply::CvNackShortCircuit, &mut self.tx);
    }

    // ------------------------------------------------------------------
    // Raw access
    // ------------------------------------------------------------------

    /// Enqueue an arbitrary frame
    ///
    /// In master mode a frame without a call byte goes out under the
    /// general broadcast token.
    pub fn send_frame(&mut self, frame: Frame) -> Result<(), StationError> {
        self.enqueue(frame)
    }
}
