//! Command dispatcher
//!
//! Turns checksum-validated inbound frames into typed operations and
//! applies their effects: slot-table bookkeeping, power-state cache,
//! notification callbacks, and reply frames enqueued for the next
//! transmission window. Replies to directed requests are built here,
//! immediately, so they are ready when the requester is polled again.
//!
//! Internal reply enqueues that hit a full TX buffer are dropped; the
//! requesting device retries on its own timeout, same as for a frame
//! lost to line noise.

use crate::buffer::FrameRing;
use crate::config::BUFFER_DEPTH;
use crate::slots::{Claim, SlotTable};
use crate::traits::Notifications;
use xpressnet_protocol::callbyte::{CallByte, CallClass, FEEDBACK_BROADCAST, GENERAL_BROADCAST};
use xpressnet_protocol::message::{Reply, Request};
use xpressnet_protocol::{Frame, PowerState, SpeedSteps};

/// Dispatcher state: everything the decoded operations read or mutate
#[derive(Debug)]
pub struct Dispatcher {
    /// Cached bus-wide operational state
    power: PowerState,
    slots: SlotTable,
    /// Answer for the next service-mode results request
    service_answer: Option<Reply>,
    /// Device that asked for the outstanding CV read, for the push reply
    cv_requester: Option<u8>,
    /// Outstanding own locomotive-info request (slave mode)
    pending_info: Option<u16>,
    /// Outstanding own function-status request (slave mode)
    pending_functions: Option<u16>,
    /// Requester and address of the last locomotive-info request
    last_info_request: Option<(u8, u16)>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            power: PowerState::Normal,
            slots: SlotTable::new(),
            service_answer: None,
            cv_requester: None,
            pending_info: None,
            pending_functions: None,
            last_info_request: None,
        }
    }

    /// Current cached power state
    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    /// Process one inbound frame
    ///
    /// `origin` is the device owning the current transmission window,
    /// i.e. the sender of a directed request. At most one frame is
    /// dispatched per poll step, preserving bus order for the callbacks.
    pub fn dispatch<N: Notifications>(
        &mut self,
        frame: &Frame,
        origin: u8,
        is_master: bool,
        tx: &mut FrameRing<BUFFER_DEPTH>,
        notify: &mut N,
    ) {
        let request = Request::from_frame(frame);
        if is_master {
            self.dispatch_as_master(request, origin, tx, notify);
        } else {
            self.dispatch_as_slave(request, notify);
        }
    }

    fn dispatch_as_master<N: Notifications>(
        &mut self,
        request: Request,
        origin: u8,
        tx: &mut FrameRing<BUFFER_DEPTH>,
        notify: &mut N,
    ) {
        let directed = CallByte::new(CallClass::Message, origin);
        match request {
            Request::Version => {
                let _ = tx.push(Reply::Version.to_frame(Some(directed)));
            }
            Request::Status => {
                let _ = tx.push(Reply::Status { power: self.power }.to_frame(Some(directed)));
            }
            Request::PowerOff => {
                self.change_power(PowerState::TrackVoltageOff, true, tx, notify);
            }
            Request::PowerOn => {
                self.change_power(PowerState::Normal, true, tx, notify);
            }
            Request::EmergencyStop => {
                self.change_power(PowerState::EmergencyStop, true, tx, notify);
            }
            Request::ServiceResults => {
                let answer = self.service_answer.unwrap_or(match self.power {
                    PowerState::ShortCircuit => Reply::CvNackShortCircuit,
                    _ => Reply::CvNack,
                });
                let _ = tx.push(answer.to_frame(Some(directed)));
            }
            Request::DirectCvRead { cv } => {
                self.service_answer = None;
                self.cv_requester = Some(origin);
                self.change_power(PowerState::ServiceMode, true, tx, notify);
                notify.cv_read_requested(cv);
            }
            Request::DirectCvWrite { cv, value } => {
                // Optimistic echo; the application overrides with a nack
                // if the decoder did not acknowledge
                self.service_answer = Some(Reply::ServiceResult { cv, value });
                self.cv_requester = Some(origin);
                self.change_power(PowerState::ServiceMode, true, tx, notify);
                notify.cv_write(cv, value);
            }
            Request::LocoInfoRequest { address } => {
                self.last_info_request = Some((origin, address));
                notify.loco_info_requested(origin, address);
            }
            Request::FunctionStatusRequest { address } => {
                self.last_info_request = Some((origin, address));
                notify.loco_function_requested(origin, address);
            }
            Request::FunctionLevelRequest { address } => {
                self.last_info_request = Some((origin, address));
                notify.loco_function_levels_requested(origin, address);
            }
            Request::Drive {
                address,
                steps,
                speed,
            } => {
                if self.claim_or_refuse(origin, address, tx) {
                    match steps {
                        SpeedSteps::Steps14 => notify.loco_drive_14(address, speed),
                        SpeedSteps::Steps27 => notify.loco_drive_27(address, speed),
                        SpeedSteps::Steps28 => notify.loco_drive_28(address, speed),
                        SpeedSteps::Steps128 => notify.loco_drive_128(address, speed),
                    }
                }
            }
            Request::Functions {
                address,
                group,
                bits,
            } => {
                if self.claim_or_refuse(origin, address, tx) {
                    match group {
                        1 => notify.loco_function_group_1(address, bits),
                        2 => notify.loco_function_group_2(address, bits),
                        3 => notify.loco_function_group_3(address, bits),
                        _ => notify.loco_function_group(address, group, bits),
                    }
                }
            }
            Request::PomWriteByte { address, cv, value } => {
                notify.pom_write_byte(address, cv, value);
            }
            Request::PomWriteBit { address, cv, value } => {
                notify.pom_write_bit(address, cv, value);
            }
            Request::TurnoutInfoRequest { address, nibble } => {
                notify.turnout_info_requested(origin, address, nibble);
            }
            Request::TurnoutCommand {
                address,
                output,
                activate,
            } => {
                notify.turnout_command(address, output, activate);
            }
            Request::Feedback { address, data } => {
                // Relay feedback from one device to every other one
                let _ = tx.push(
                    Reply::Feedback {
                        data1: address,
                        data2: data,
                    }
                    .to_frame(Some(FEEDBACK_BROADCAST)),
                );
                notify.feedback(address, data);
            }
            Request::Unknown { .. } => {
                // Answer something so the requester does not wait out
                // its full timeout
                let _ = tx.push(Reply::NotSupported.to_frame(Some(directed)));
            }
            // Reply-shaped traffic is meaningless while mastering
            Request::PowerBroadcast { .. }
            | Request::StatusReply { .. }
            | Request::LocoInfoReply { .. }
            | Request::FunctionStatusReply { .. }
            | Request::ServiceResult { .. } => {}
        }
    }

    fn dispatch_as_slave<N: Notifications>(&mut self, request: Request, notify: &mut N) {
        match request {
            Request::PowerBroadcast { power } => {
                if self.power != power {
                    self.power = power;
                    notify.power_changed(power);
                }
            }
            Request::StatusReply { power } => {
                if self.power != power {
                    self.power = power;
                    notify.power_changed(power);
                }
            }
            Request::LocoInfoReply {
                steps,
                busy,
                speed,
                f0,
                f1,
            } => {
                if let Some(address) = self.pending_info.take() {
                    notify.loco_info_received(address, steps, busy, speed, f0, f1);
                }
            }
            Request::FunctionStatusReply { f4, f5 } => {
                if let Some(address) = self.pending_functions.take() {
                    notify.loco_function_status_received(address, f4, f5);
                }
            }
            Request::ServiceResult { cv, value } => {
                notify.service_result_received(cv, value);
            }
            Request::Feedback { address, data } => {
                notify.feedback(address, data);
            }
            Request::TurnoutCommand {
                address,
                output,
                activate,
            } => {
                notify.turnout_command(address, output, activate);
            }
            // Directed requests are for the acting master, not for us
            _ => {}
        }
    }

    /// Slot-busy bookkeeping for drive/function commands
    ///
    /// Returns true when `origin` may control the address. On a conflict
    /// the requester gets a busy notice and ownership stays untouched.
    fn claim_or_refuse(
        &mut self,
        origin: u8,
        address: u16,
        tx: &mut FrameRing<BUFFER_DEPTH>,
    ) -> bool {
        match self.slots.claim(origin, address) {
            Claim::Granted | Claim::AlreadyHeld => true,
            Claim::Conflict { .. } => {
                let directed = CallByte::new(CallClass::Message, origin);
                let _ = tx.push(Reply::Busy { address }.to_frame(Some(directed)));
                false
            }
        }
    }

    /// Change the power state and broadcast it (master side)
    ///
    /// The notification fires only on an actual change.
    pub fn change_power<N: Notifications>(
        &mut self,
        power: PowerState,
        announce: bool,
        tx: &mut FrameRing<BUFFER_DEPTH>,
        notify: &mut N,
    ) {
        if announce {
            let _ = tx.push(Reply::PowerBroadcast { power }.to_frame(Some(GENERAL_BROADCAST)));
        }
        if self.power != power {
            self.power = power;
            notify.power_changed(power);
        }
    }

    /// Start an own locomotive-info request (slave mode)
    ///
    /// Refused while a previous one is still unanswered.
    pub fn begin_info_request(&mut self, address: u16) -> bool {
        if self.pending_info.is_some() {
            return false;
        }
        self.pending_info = Some(address);
        true
    }

    /// Start an own function-status request (slave mode)
    pub fn begin_function_request(&mut self, address: u16) -> bool {
        if self.pending_functions.is_some() {
            return false;
        }
        self.pending_functions = Some(address);
        true
    }

    /// Build the locomotive-info answer for the last requester
    ///
    /// The busy flag is set when the requested loco is held by a slot
    /// other than the one being answered.
    pub fn loco_info_reply(&self, slot: u8, steps: SpeedSteps, speed: u8, f0: u8, f1: u8) -> Reply {
        Reply::LocoInfo {
            steps,
            busy: self.is_busy_for(slot),
            speed,
            f0,
            f1,
        }
    }

    /// Extended-info variant of [`Self::loco_info_reply`]
    #[allow(clippy::too_many_arguments)]
    pub fn loco_info_extended_reply(
        &self,
        slot: u8,
        steps: SpeedSteps,
        speed: u8,
        f0: u8,
        f1: u8,
        f2: u8,
        f3: u8,
    ) -> Reply {
        Reply::LocoInfoExtended {
            steps,
            busy: self.is_busy_for(slot),
            speed,
            f0,
            f1,
            f2,
            f3,
        }
    }

    /// The application finished a CV read; push and cache the result
    pub fn supply_cv_answer(&mut self, answer: Reply, tx: &mut FrameRing<BUFFER_DEPTH>) {
        self.service_answer = Some(answer);
        if let Some(requester) = self.cv_requester.take() {
            let directed = CallByte::new(CallClass::Message, requester);
            let _ = tx.push(answer.to_frame(Some(directed)));
        }
    }

    fn is_busy_for(&self, slot: u8) -> bool {
        match self.last_info_request {
            Some((_, address)) => matches!(
                self.slots.holder(address),
                Some(holder) if holder != slot
            ),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpressnet_protocol::message::encode_loco_address;

    #[derive(Default)]
    struct Recorder {
        power: Option<PowerState>,
        drive_128: Option<(u16, u8)>,
        group_1: Option<(u16, u8)>,
        generic_group: Option<(u16, u8, u8)>,
        cv_read: Option<u16>,
        info_request: Option<(u8, u16)>,
        info_received: Option<(u16, u8)>,
        feedback: Option<(u8, u8)>,
    }

    impl Notifications for Recorder {
        fn power_changed(&mut self, power: PowerState) {
            self.power = Some(power);
        }
        fn loco_drive_128(&mut self, address: u16, speed: u8) {
            self.drive_128 = Some((address, speed));
        }
        fn loco_function_group_1(&mut self, address: u16, bits: u8) {
            self.group_1 = Some((address, bits));
        }
        fn loco_function_group(&mut self, address: u16, group: u8, bits: u8) {
            self.generic_group = Some((address, group, bits));
        }
        fn cv_read_requested(&mut self, cv: u16) {
            self.cv_read = Some(cv);
        }
        fn loco_info_requested(&mut self, slot: u8, address: u16) {
            self.info_request = Some((slot, address));
        }
        fn loco_info_received(
            &mut self,
            address: u16,
            _steps: SpeedSteps,
            _busy: bool,
            speed: u8,
            _f0: u8,
            _f1: u8,
        ) {
            self.info_received = Some((address, speed));
        }
        fn feedback(&mut self, address: u8, data: u8) {
            self.feedback = Some((address, data));
        }
    }

    fn run_master(
        dispatcher: &mut Dispatcher,
        notify: &mut Recorder,
        tx: &mut FrameRing<BUFFER_DEPTH>,
        origin: u8,
        header: u8,
        data: &[u8],
    ) {
        let frame = Frame::new(header, data).unwrap();
        dispatcher.dispatch(&frame, origin, true, tx, notify);
    }

    #[test]
    fn test_drive_128_dispatch() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        let (high, low) = encode_loco_address(1000);
        run_master(&mut dispatcher, &mut notify, &mut tx, 3, 0xE4, &[0x13, high, low, 0x5A]);

        assert_eq!(notify.drive_128, Some((1000, 0x5A)));
        // Slot 3 now holds the loco, no busy reply was sent
        assert_eq!(dispatcher.slots().holder(1000), Some(3));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_drive_conflict_sends_busy() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        let (high, low) = encode_loco_address(44);
        run_master(&mut dispatcher, &mut notify, &mut tx, 3, 0xE4, &[0x13, high, low, 0x10]);
        notify.drive_128 = None;

        // A different device wants the same loco
        run_master(&mut dispatcher, &mut notify, &mut tx, 7, 0xE4, &[0x13, high, low, 0x20]);

        assert_eq!(notify.drive_128, None);
        assert_eq!(dispatcher.slots().holder(44), Some(3));

        let busy = tx.try_read().unwrap();
        assert_eq!(busy.header, 0xE3);
        assert_eq!(busy.data[0], 0x40);
        assert_eq!(busy.call_byte.unwrap().address(), 7);
    }

    #[test]
    fn test_function_groups_route_to_callbacks() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        run_master(&mut dispatcher, &mut notify, &mut tx, 2, 0xE4, &[0x20, 0x00, 0x08, 0x11]);
        assert_eq!(notify.group_1, Some((8, 0x11)));

        run_master(&mut dispatcher, &mut notify, &mut tx, 2, 0xE4, &[0x28, 0x00, 0x08, 0xFF]);
        assert_eq!(notify.generic_group, Some((8, 5, 0xFF)));
    }

    #[test]
    fn test_power_request_broadcasts_and_notifies() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        run_master(&mut dispatcher, &mut notify, &mut tx, 1, 0x21, &[0x80]);

        assert_eq!(notify.power, Some(PowerState::TrackVoltageOff));
        assert_eq!(dispatcher.power(), PowerState::TrackVoltageOff);

        let broadcast = tx.try_read().unwrap();
        assert_eq!(broadcast.header, 0x61);
        assert_eq!(broadcast.data[0], 0x00);
        assert!(broadcast.call_byte.unwrap().is_broadcast());
    }

    #[test]
    fn test_unknown_header_gets_not_supported_reply() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        run_master(&mut dispatcher, &mut notify, &mut tx, 9, 0x13, &[0x01, 0x02]);

        let reply = tx.try_read().unwrap();
        assert_eq!(reply.header, 0x61);
        assert_eq!(reply.data[0], 0x82);
        assert_eq!(reply.call_byte.unwrap().address(), 9);
    }

    #[test]
    fn test_cv_read_deferred_to_application() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        run_master(&mut dispatcher, &mut notify, &mut tx, 4, 0x22, &[0x15, 0x05]);
        assert_eq!(notify.cv_read, Some(5));
        assert_eq!(dispatcher.power(), PowerState::ServiceMode);
        // Only the service-mode broadcast is queued so far
        assert_eq!(tx.try_read().unwrap().header, 0x61);
        assert!(tx.is_empty());

        // Application supplies the value: directed reply goes out
        dispatcher.supply_cv_answer(Reply::ServiceResult { cv: 5, value: 0x2A }, &mut tx);
        let reply = tx.try_read().unwrap();
        assert_eq!(reply.header, 0x63);
        assert_eq!(&reply.data[..], &[0x14, 0x05, 0x2A]);
        assert_eq!(reply.call_byte.unwrap().address(), 4);

        // A later results request is answered from the cache
        run_master(&mut dispatcher, &mut notify, &mut tx, 4, 0x21, &[0x10]);
        assert_eq!(tx.try_read().unwrap().header, 0x63);
    }

    #[test]
    fn test_service_results_without_answer_is_nack() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        run_master(&mut dispatcher, &mut notify, &mut tx, 4, 0x21, &[0x10]);
        let reply = tx.try_read().unwrap();
        assert_eq!((reply.header, reply.data[0]), (0x61, 0x13));
    }

    #[test]
    fn test_feedback_relayed_to_all() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        let mut frame = Frame::new(0x42, &[0x05, 0x81]).unwrap();
        frame.call_byte = Some(FEEDBACK_BROADCAST);
        dispatcher.dispatch(&frame, 6, true, &mut tx, &mut notify);

        assert_eq!(notify.feedback, Some((0x05, 0x81)));
        let relayed = tx.try_read().unwrap();
        assert_eq!(relayed.call_byte, Some(FEEDBACK_BROADCAST));
        assert_eq!(&relayed.data[..], &[0x05, 0x81]);
    }

    #[test]
    fn test_slave_power_broadcast_updates_cache() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        let frame = Frame::new(0x61, &[0x02]).unwrap();
        dispatcher.dispatch(&frame, 0, false, &mut tx, &mut notify);

        assert_eq!(dispatcher.power(), PowerState::ServiceMode);
        assert_eq!(notify.power, Some(PowerState::ServiceMode));
        // Slaves never broadcast
        assert!(tx.is_empty());
    }

    #[test]
    fn test_pending_info_request_single_outstanding() {
        let mut dispatcher = Dispatcher::new();
        assert!(dispatcher.begin_info_request(1000));
        // Second request while the first is unanswered
        assert!(!dispatcher.begin_info_request(1001));

        // The reply releases the pending state
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();
        let frame = Frame::new(0xE4, &[0x04, 0x2F, 0x00, 0x00]).unwrap();
        dispatcher.dispatch(&frame, 0, false, &mut tx, &mut notify);

        assert_eq!(notify.info_received, Some((1000, 0x2F)));
        assert!(dispatcher.begin_info_request(1001));
    }

    #[test]
    fn test_loco_info_reply_busy_flag() {
        let mut dispatcher = Dispatcher::new();
        let mut notify = Recorder::default();
        let mut tx = FrameRing::new();

        // Slot 3 drives loco 44, then slot 7 asks about it
        let (high, low) = encode_loco_address(44);
        run_master(&mut dispatcher, &mut notify, &mut tx, 3, 0xE4, &[0x13, high, low, 0x10]);
        run_master(&mut dispatcher, &mut notify, &mut tx, 7, 0xE3, &[0x00, high, low]);
        assert_eq!(notify.info_request, Some((7, 44)));

        let reply = dispatcher.loco_info_reply(7, SpeedSteps::Steps128, 0x10, 0, 0);
        assert!(matches!(reply, Reply::LocoInfo { busy: true, .. }));

        // The holder itself is not told "busy"
        let reply = dispatcher.loco_info_reply(3, SpeedSteps::Steps128, 0x10, 0, 0);
        assert!(matches!(reply, Reply::LocoInfo { busy: false, .. }));
    }
}
