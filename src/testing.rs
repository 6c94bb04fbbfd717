//! Scripted collaborators for driving the controller in tests

use crate::controller::StrapController;
use crate::strap::traits::{Presenter, TimerHandle, Timers, Transport, TransportError};
use crate::system::events::{StrapEvent, Wakeup};
use crate::types::{
    AttributeId, ConnectionState, DecodedReadings, ServiceId, RAW_DATA_SERVICE, SERVICE_BAT,
    SERVICE_GPS, SERVICE_NFC,
};
use embassy_time::Duration;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub services: Vec<ServiceId>,
    /// Issuance results handed out in order, `Ok` once exhausted
    pub read_results: VecDeque<Result<(), TransportError>>,
    /// Every read attempt, accepted or not
    pub reads: Vec<AttributeId>,
    pub writes: Vec<(AttributeId, Vec<u8>)>,
    pub write_result: Option<TransportError>,
    pub response_timeout: Option<Duration>,
    pub created: Vec<(AttributeId, usize)>,
}

impl ScriptedTransport {
    pub fn attached() -> Self {
        Self {
            services: vec![RAW_DATA_SERVICE, SERVICE_GPS, SERVICE_BAT, SERVICE_NFC],
            ..Self::default()
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, service: ServiceId) {
        if !self.services.contains(&service) {
            self.services.push(service);
        }
    }

    pub fn detach(&mut self, service: ServiceId) {
        self.services.retain(|&s| s != service);
    }

    pub fn fail_next(&mut self, error: TransportError) {
        self.read_results.push_back(Err(error));
    }
}

impl Transport for ScriptedTransport {
    fn is_service_available(&self, service: ServiceId) -> bool {
        self.services.contains(&service)
    }

    fn issue_read(&mut self, attribute: AttributeId) -> Result<(), TransportError> {
        self.reads.push(attribute);
        self.read_results.pop_front().unwrap_or(Ok(()))
    }

    fn issue_write(
        &mut self,
        attribute: AttributeId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if let Some(error) = self.write_result {
            return Err(error);
        }
        self.writes.push((attribute, payload.to_vec()));
        Ok(())
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = Some(timeout);
    }

    fn create_attribute(&mut self, attribute: AttributeId, buffer_len: usize) {
        self.created.push((attribute, buffer_len));
    }
}

/// Timers that only fire when a test says so.
#[derive(Debug, Default)]
pub struct ManualTimers {
    next: u32,
    pub armed: Vec<(TimerHandle, Duration, Wakeup)>,
    pub cancelled: Vec<TimerHandle>,
}

impl ManualTimers {
    pub fn delay_of(&self, wakeup: Wakeup) -> Option<Duration> {
        self.armed
            .iter()
            .find(|(_, _, w)| *w == wakeup)
            .map(|(_, delay, _)| *delay)
    }

    pub fn is_armed(&self, wakeup: Wakeup) -> bool {
        self.delay_of(wakeup).is_some()
    }

    pub fn count(&self, wakeup: Wakeup) -> usize {
        self.armed.iter().filter(|(_, _, w)| *w == wakeup).count()
    }

    /// Remove an armed timer as if it had expired.
    pub fn take(&mut self, wakeup: Wakeup) -> Option<Duration> {
        let index = self.armed.iter().position(|(_, _, w)| *w == wakeup)?;
        Some(self.armed.remove(index).1)
    }
}

impl Timers for ManualTimers {
    fn schedule(&mut self, delay: Duration, wakeup: Wakeup) -> TimerHandle {
        self.next += 1;
        let handle = TimerHandle(self.next);
        self.armed.push((handle, delay, wakeup));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.armed.retain(|(h, _, _)| *h != handle);
        self.cancelled.push(handle);
    }
}

#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub states: Vec<ConnectionState>,
    pub updates: usize,
    pub last: Option<DecodedReadings>,
    pub acks: Vec<(AttributeId, Result<(), TransportError>)>,
}

impl Presenter for RecordingPresenter {
    fn connection_changed(&mut self, state: ConnectionState) {
        self.states.push(state);
    }

    fn readings_updated(&mut self, readings: &DecodedReadings) {
        self.updates += 1;
        self.last = Some(readings.clone());
    }

    fn write_acknowledged(
        &mut self,
        attribute: AttributeId,
        result: Result<(), TransportError>,
    ) {
        self.acks.push((attribute, result));
    }
}

/// Expire an armed timer and deliver its wake-up. Returns false if it was not armed.
pub fn fire<T: Transport, P: Presenter>(
    controller: &mut StrapController<T, ManualTimers, P>,
    wakeup: Wakeup,
) -> bool {
    if controller.timers_mut().take(wakeup).is_none() {
        return false;
    }
    controller.handle(StrapEvent::Wakeup(wakeup));
    true
}
