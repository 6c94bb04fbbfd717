//! Read request state machine for the strap link
//! States: Disconnected, Idle, AwaitingResponse
//!
//! At most one read is outstanding at a time. Round-robin endpoints are
//! polled in registration order; a tag-present notification arms a
//! priority read that goes ahead of the rotation exactly once.

use crate::endpoints::{EndpointHandle, EndpointTable};
use crate::protocol::decode;
use crate::strap::traits::{ErrorClass, TransportError};
use crate::system::config::LinkTiming;
use crate::system::events::Wakeup;
use crate::types::{AttributeId, DecodedReadings, Payload};
use embassy_time::Duration;
use log::{debug, error, warn};
use statig::prelude::*;

pub const OUTPUT_CAPACITY: usize = 8;

pub type LinkOutputs = heapless::Vec<LinkOutput, OUTPUT_CAPACITY>;

// Reconnect checks requested from the disconnected state run right away
const IMMEDIATE: Duration = Duration::from_millis(1);

/// What a read is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    RoundRobin {
        handle: EndpointHandle,
        attribute: AttributeId,
    },
    Priority(AttributeId),
}

impl ReadTarget {
    pub fn attribute(&self) -> AttributeId {
        match self {
            ReadTarget::RoundRobin { attribute, .. } => *attribute,
            ReadTarget::Priority(attribute) => *attribute,
        }
    }
}

// Input events to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    // From the connection monitor
    Connected,
    Disconnected,

    // Timer wake-ups
    PollTick,
    ResponseTimeout,

    // Outcome of submitting a read requested through `LinkOutput::IssueRead`
    Issued(ReadTarget),
    IssueFailed {
        target: ReadTarget,
        error: TransportError,
    },

    // From the transport
    Response {
        attribute: AttributeId,
        result: Result<Payload, TransportError>,
    },
    TagPresent(AttributeId),
}

// Output events from the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutput {
    IssueRead(ReadTarget),
    Schedule { wakeup: Wakeup, delay: Duration },
    CancelResponseTimeout,
    ReadingsUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Disconnected,
    Idle,
    AwaitingResponse,
}

// Shared context for the state machine
#[derive(Debug)]
pub struct LinkContext {
    endpoints: EndpointTable,
    readings: DecodedReadings,
    priority: Option<AttributeId>,
    timing: LinkTiming,
    outputs: LinkOutputs,
}

impl LinkContext {
    fn new(endpoints: EndpointTable, timing: LinkTiming) -> Self {
        Self {
            endpoints,
            readings: DecodedReadings::default(),
            priority: None,
            timing,
            outputs: LinkOutputs::new(),
        }
    }

    fn emit(&mut self, output: LinkOutput) {
        if let Err(output) = self.outputs.push(output) {
            error!("Link output queue full, dropping {:?}", output);
        }
    }

    fn schedule(&mut self, wakeup: Wakeup, delay: Duration) {
        self.emit(LinkOutput::Schedule { wakeup, delay });
    }

    fn arm_priority(&mut self, attribute: AttributeId) {
        if self.priority.replace(attribute).is_none() {
            debug!("Priority read armed for {}", attribute);
        }
    }

    /// Pick the next read: an armed priority attribute first, otherwise the
    /// next available round-robin endpoint.
    fn select_target(&mut self) -> Option<ReadTarget> {
        if let Some(attribute) = self.priority {
            return Some(ReadTarget::Priority(attribute));
        }
        let handle = self.endpoints.select_available()?;
        let attribute = self.endpoints.get(handle)?.attribute;
        Some(ReadTarget::RoundRobin { handle, attribute })
    }

    /// A read was accepted by the transport: consume the priority request or
    /// move the rotation on.
    fn commit(&mut self, target: ReadTarget) {
        match target {
            ReadTarget::Priority(attribute) => {
                if self.priority == Some(attribute) {
                    self.priority = None;
                }
            }
            ReadTarget::RoundRobin { .. } => self.endpoints.advance(),
        }
    }

    fn issue_failed(&mut self, target: ReadTarget, error: TransportError) {
        warn!("Read of {} failed with result: {}", target.attribute(), error);

        match error.class() {
            ErrorClass::Busy => self.schedule(Wakeup::PollTick, self.timing.retry_delay),
            ErrorClass::Timeout => {
                self.schedule(Wakeup::CheckConnection, self.timing.verify_delay)
            }
            ErrorClass::Unavailable => {
                match target {
                    ReadTarget::RoundRobin { handle, attribute } => {
                        debug!("Skipping {} until it is announced again", attribute);
                        self.endpoints.mark_endpoint_unavailable(handle);
                    }
                    ReadTarget::Priority(attribute) => {
                        debug!("Dropping priority read of {}", attribute);
                        self.priority = None;
                    }
                }
                self.schedule(Wakeup::PollTick, self.timing.backoff);
            }
        }
    }

    /// Decode a completed read into the readings.
    fn absorb(&mut self, attribute: AttributeId, result: &Result<Payload, TransportError>) {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Read of {} completed with {}", attribute, e);
                return;
            }
        };

        let Some(field) = decode(attribute, payload) else {
            return;
        };

        match self.readings.apply(field) {
            Ok(()) => self.emit(LinkOutput::ReadingsUpdated),
            Err(e) => error!("Cannot render value read from {}: {}", attribute, e),
        }
    }
}

#[derive(Debug, Default)]
pub struct LinkStateMachine;

#[state_machine(
    initial = "State::disconnected()",
    state(derive(Debug, Clone, PartialEq, Eq)),
    on_transition = "Self::on_transition"
)]
impl LinkStateMachine {
    /// Strap not attached, nothing is issued
    #[state]
    fn disconnected(context: &mut LinkContext, event: &LinkInput) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::Connected => {
                context.schedule(Wakeup::PollTick, context.timing.retry_delay);
                Transition(State::idle())
            }
            LinkInput::PollTick => {
                context.schedule(Wakeup::CheckConnection, IMMEDIATE);
                Handled
            }
            LinkInput::TagPresent(attribute) => {
                context.arm_priority(*attribute);
                Handled
            }
            LinkInput::Response { attribute, .. } => {
                debug!("Dropping response from {} while disconnected", attribute);
                Handled
            }
            _ => Handled,
        }
    }

    /// Connected with no read in flight
    #[state]
    fn idle(context: &mut LinkContext, event: &LinkInput) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::Connected => {
                context.schedule(Wakeup::PollTick, context.timing.retry_delay);
                Handled
            }
            LinkInput::Disconnected => Transition(State::disconnected()),
            LinkInput::PollTick => {
                match context.select_target() {
                    Some(target) => context.emit(LinkOutput::IssueRead(target)),
                    None => {
                        debug!("No endpoint available, re-checking connection");
                        context.schedule(Wakeup::CheckConnection, context.timing.verify_delay);
                    }
                }
                Handled
            }
            LinkInput::Issued(target) => {
                context.commit(*target);
                context.schedule(Wakeup::ResponseTimeout, context.timing.response_timeout);
                Transition(State::awaiting_response(*target))
            }
            LinkInput::IssueFailed { target, error } => {
                context.issue_failed(*target, *error);
                Handled
            }
            LinkInput::Response { attribute, result } => {
                // Late answer to a read that already timed out
                context.absorb(*attribute, result);
                Handled
            }
            LinkInput::TagPresent(attribute) => {
                context.arm_priority(*attribute);
                Handled
            }
            LinkInput::ResponseTimeout => Handled,
        }
    }

    /// One read in flight, waiting for its completion or timeout
    #[state]
    fn awaiting_response(
        target: &ReadTarget,
        context: &mut LinkContext,
        event: &LinkInput,
    ) -> Response<State> {
        use Response::*;

        match event {
            LinkInput::Response { attribute, result } => {
                if *attribute != target.attribute() {
                    debug!(
                        "Response from {} while waiting on {}",
                        attribute,
                        target.attribute()
                    );
                }
                context.emit(LinkOutput::CancelResponseTimeout);
                context.absorb(*attribute, result);
                context.schedule(Wakeup::PollTick, context.timing.inter_request_delay);
                Transition(State::idle())
            }
            LinkInput::ResponseTimeout => {
                warn!("No response from {}, re-checking connection", target.attribute());
                context.schedule(Wakeup::CheckConnection, context.timing.verify_delay);
                Transition(State::idle())
            }
            LinkInput::Disconnected => {
                context.emit(LinkOutput::CancelResponseTimeout);
                Transition(State::disconnected())
            }
            LinkInput::TagPresent(attribute) => {
                context.arm_priority(*attribute);
                Handled
            }
            // Single outstanding request: no new reads until this one settles
            LinkInput::PollTick
            | LinkInput::Connected
            | LinkInput::Issued(_)
            | LinkInput::IssueFailed { .. } => Handled,
        }
    }
}

impl LinkStateMachine {
    fn on_transition(&mut self, source: &State, target: &State) {
        debug!(
            "Link state: {:?} -> {:?}",
            Self::scheduler_state(source),
            Self::scheduler_state(target)
        );
    }

    fn scheduler_state(state: &State) -> SchedulerState {
        match state {
            State::Disconnected {} => SchedulerState::Disconnected,
            State::Idle {} => SchedulerState::Idle,
            State::AwaitingResponse { .. } => SchedulerState::AwaitingResponse,
        }
    }
}

/// Owns the request state machine together with the endpoint table and
/// the decoded readings it updates.
pub struct RequestScheduler {
    machine: StateMachine<LinkStateMachine>,
    context: LinkContext,
}

impl RequestScheduler {
    pub fn new(endpoints: EndpointTable, timing: LinkTiming) -> Self {
        Self {
            machine: LinkStateMachine::default().state_machine(),
            context: LinkContext::new(endpoints, timing),
        }
    }

    /// Process an input event and return output events
    pub fn handle_input(&mut self, input: LinkInput) -> LinkOutputs {
        self.context.outputs.clear();
        let _ = self.machine.handle_with_context(&input, &mut self.context);
        std::mem::take(&mut self.context.outputs)
    }

    pub fn state(&self) -> SchedulerState {
        LinkStateMachine::scheduler_state(self.machine.state())
    }

    /// The read currently in flight, if any.
    pub fn pending(&self) -> Option<ReadTarget> {
        match self.machine.state() {
            State::AwaitingResponse { target } => Some(*target),
            _ => None,
        }
    }

    pub fn priority(&self) -> Option<AttributeId> {
        self.context.priority
    }

    pub fn readings(&self) -> &DecodedReadings {
        &self.context.readings
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.context.endpoints
    }

    pub fn endpoints_mut(&mut self) -> &mut EndpointTable {
        &mut self.context.endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BAT_V, GPS_LOCATION, GPS_SPEED, NFC_GET_UID};

    fn scheduler() -> RequestScheduler {
        let mut endpoints = EndpointTable::new();
        endpoints.register(BAT_V, 4).unwrap();
        endpoints.register(GPS_LOCATION, 16).unwrap();
        endpoints.register(GPS_SPEED, 4).unwrap();
        RequestScheduler::new(endpoints, LinkTiming::default())
    }

    fn connected() -> RequestScheduler {
        let mut scheduler = scheduler();
        scheduler.handle_input(LinkInput::Connected);
        scheduler
    }

    fn requested(outputs: &LinkOutputs) -> Option<ReadTarget> {
        outputs.iter().find_map(|output| match output {
            LinkOutput::IssueRead(target) => Some(*target),
            _ => None,
        })
    }

    /// Poll and report the read as accepted by the transport.
    fn issue(scheduler: &mut RequestScheduler) -> ReadTarget {
        let outputs = scheduler.handle_input(LinkInput::PollTick);
        let target = requested(&outputs).expect("a read should be requested");
        scheduler.handle_input(LinkInput::Issued(target));
        target
    }

    fn respond(
        scheduler: &mut RequestScheduler,
        attribute: AttributeId,
        data: &[u8],
    ) -> LinkOutputs {
        scheduler.handle_input(LinkInput::Response {
            attribute,
            result: Ok(Payload::from_slice(data).unwrap()),
        })
    }

    #[test]
    fn test_starts_disconnected() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.state(), SchedulerState::Disconnected);

        let outputs = scheduler.handle_input(LinkInput::PollTick);
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::CheckConnection,
                delay: IMMEDIATE,
            }]
        );
    }

    #[test]
    fn test_connect_schedules_first_poll() {
        let mut scheduler = scheduler();
        let outputs = scheduler.handle_input(LinkInput::Connected);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::PollTick,
                delay: Duration::from_millis(100),
            }]
        );
    }

    #[test]
    fn test_issue_arms_response_timeout() {
        let mut scheduler = connected();
        let outputs = scheduler.handle_input(LinkInput::PollTick);
        let target = requested(&outputs).unwrap();
        assert_eq!(target.attribute(), BAT_V);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let outputs = scheduler.handle_input(LinkInput::Issued(target));
        assert_eq!(scheduler.state(), SchedulerState::AwaitingResponse);
        assert_eq!(scheduler.pending(), Some(target));
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::ResponseTimeout,
                delay: Duration::from_millis(1000),
            }]
        );
    }

    #[test]
    fn test_no_second_read_while_awaiting() {
        let mut scheduler = connected();
        issue(&mut scheduler);

        let outputs = scheduler.handle_input(LinkInput::PollTick);
        assert!(outputs.is_empty());
        assert_eq!(scheduler.state(), SchedulerState::AwaitingResponse);
    }

    #[test]
    fn test_response_returns_to_idle_and_advances() {
        let mut scheduler = connected();
        issue(&mut scheduler);

        let outputs = respond(&mut scheduler, BAT_V, &[0x9C, 0x01]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.pending(), None);
        assert_eq!(
            outputs.as_slice(),
            &[
                LinkOutput::CancelResponseTimeout,
                LinkOutput::ReadingsUpdated,
                LinkOutput::Schedule {
                    wakeup: Wakeup::PollTick,
                    delay: Duration::from_millis(200),
                },
            ]
        );
        assert_eq!(scheduler.readings().battery_voltage.as_str(), "4.1");

        assert_eq!(issue(&mut scheduler).attribute(), GPS_LOCATION);
    }

    #[test]
    fn test_undersized_payload_updates_nothing() {
        let mut scheduler = connected();
        issue(&mut scheduler);

        let outputs = respond(&mut scheduler, BAT_V, &[0x9C]);
        assert!(!outputs.contains(&LinkOutput::ReadingsUpdated));
        assert_eq!(scheduler.readings(), &DecodedReadings::default());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_failed_completion_still_moves_on() {
        let mut scheduler = connected();
        issue(&mut scheduler);

        let outputs = scheduler.handle_input(LinkInput::Response {
            attribute: BAT_V,
            result: Err(TransportError::ServiceUnavailable),
        });
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(outputs.contains(&LinkOutput::Schedule {
            wakeup: Wakeup::PollTick,
            delay: Duration::from_millis(200),
        }));
        assert!(!outputs.contains(&LinkOutput::ReadingsUpdated));
    }

    #[test]
    fn test_timeout_triggers_connection_check() {
        let mut scheduler = connected();
        issue(&mut scheduler);

        let outputs = scheduler.handle_input(LinkInput::ResponseTimeout);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::CheckConnection,
                delay: Duration::from_millis(100),
            }]
        );
    }

    #[test]
    fn test_disconnect_clears_pending() {
        let mut scheduler = connected();
        issue(&mut scheduler);

        let outputs = scheduler.handle_input(LinkInput::Disconnected);
        assert_eq!(scheduler.state(), SchedulerState::Disconnected);
        assert_eq!(scheduler.pending(), None);
        assert_eq!(outputs.as_slice(), &[LinkOutput::CancelResponseTimeout]);

        scheduler.handle_input(LinkInput::Connected);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(issue(&mut scheduler).attribute(), GPS_LOCATION);
    }

    #[test]
    fn test_priority_preempts_round_robin_once() {
        let mut scheduler = connected();
        issue(&mut scheduler);
        scheduler.handle_input(LinkInput::TagPresent(NFC_GET_UID));
        respond(&mut scheduler, BAT_V, &[0x9C, 0x01]);

        assert_eq!(issue(&mut scheduler), ReadTarget::Priority(NFC_GET_UID));
        assert_eq!(scheduler.priority(), None);
        respond(&mut scheduler, NFC_GET_UID, &[0x04, 0xA2, 0x3B, 0x7C]);
        assert!(scheduler.readings().has_tag());

        assert_eq!(issue(&mut scheduler).attribute(), GPS_LOCATION);
    }

    #[test]
    fn test_busy_retries_same_endpoint() {
        let mut scheduler = connected();
        let outputs = scheduler.handle_input(LinkInput::PollTick);
        let target = requested(&outputs).unwrap();

        let outputs = scheduler.handle_input(LinkInput::IssueFailed {
            target,
            error: TransportError::Busy,
        });
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::PollTick,
                delay: Duration::from_millis(100),
            }]
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(issue(&mut scheduler), target);
    }

    #[test]
    fn test_synchronous_timeout_verifies_connection() {
        let mut scheduler = connected();
        let outputs = scheduler.handle_input(LinkInput::PollTick);
        let target = requested(&outputs).unwrap();

        let outputs = scheduler.handle_input(LinkInput::IssueFailed {
            target,
            error: TransportError::Timeout,
        });
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::CheckConnection,
                delay: Duration::from_millis(100),
            }]
        );
    }

    #[test]
    fn test_unsupported_endpoint_is_skipped() {
        let mut scheduler = connected();
        let outputs = scheduler.handle_input(LinkInput::PollTick);
        let target = requested(&outputs).unwrap();

        let outputs = scheduler.handle_input(LinkInput::IssueFailed {
            target,
            error: TransportError::AttributeUnsupported,
        });
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::PollTick,
                delay: Duration::from_millis(1000),
            }]
        );
        assert_eq!(issue(&mut scheduler).attribute(), GPS_LOCATION);
    }

    #[test]
    fn test_failed_priority_read_is_dropped() {
        let mut scheduler = connected();
        scheduler.handle_input(LinkInput::TagPresent(NFC_GET_UID));
        let outputs = scheduler.handle_input(LinkInput::PollTick);
        let target = requested(&outputs).unwrap();
        assert_eq!(target, ReadTarget::Priority(NFC_GET_UID));

        scheduler.handle_input(LinkInput::IssueFailed {
            target,
            error: TransportError::ServiceUnavailable,
        });
        assert_eq!(scheduler.priority(), None);
        assert_eq!(issue(&mut scheduler).attribute(), BAT_V);
    }

    #[test]
    fn test_nothing_available_rechecks_connection() {
        let mut scheduler = connected();
        for service in [BAT_V.service, GPS_LOCATION.service] {
            scheduler.endpoints_mut().mark_available(service, false);
        }

        let outputs = scheduler.handle_input(LinkInput::PollTick);
        assert_eq!(
            outputs.as_slice(),
            &[LinkOutput::Schedule {
                wakeup: Wakeup::CheckConnection,
                delay: Duration::from_millis(100),
            }]
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_tag_armed_while_disconnected_is_served_after_reconnect() {
        let mut scheduler = scheduler();
        scheduler.handle_input(LinkInput::TagPresent(NFC_GET_UID));
        scheduler.handle_input(LinkInput::Connected);
        assert_eq!(issue(&mut scheduler), ReadTarget::Priority(NFC_GET_UID));
    }

    #[test]
    fn test_late_response_in_idle_updates_readings_only() {
        let mut scheduler = connected();
        issue(&mut scheduler);
        scheduler.handle_input(LinkInput::ResponseTimeout);

        let outputs = respond(&mut scheduler, BAT_V, &[0x9C, 0x01]);
        assert_eq!(outputs.as_slice(), &[LinkOutput::ReadingsUpdated]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
