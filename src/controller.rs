use crate::{
    endpoints::EndpointTable,
    link::{
        AvailabilityAction, ConnectionMonitor, LinkInput, LinkOutput, RequestScheduler,
        SchedulerState,
    },
    strap::traits::{Presenter, TimerHandle, Timers, Transport, TransportError},
    system::{
        config::{ConfigError, LinkConfig, LinkTiming},
        events::{StrapEvent, Wakeup},
    },
    types::{
        AttributeId, ConnectionState, DecodedReadings, ServiceId, BAT_CHG, BAT_CHG_LEN,
        NFC_GET_UID, NFC_UID_LEN, RAW_DATA, RAW_DATA_LEN,
    },
};
use embassy_time::Duration;
use log::{debug, info, warn};

/// The strap link core.
///
/// Owns the transport, the timer primitive and the presenter together with
/// the connection monitor and request scheduler. Every asynchronous input
/// enters through [`StrapController::handle`] and is processed to completion
/// before the next one.
pub struct StrapController<T: Transport, K: Timers, P: Presenter> {
    transport: T,
    timers: K,
    presenter: P,
    monitor: ConnectionMonitor,
    scheduler: RequestScheduler,
    timing: LinkTiming,

    // One armed timer per wake-up kind, indexed by `Wakeup::slot`
    armed: [Option<TimerHandle>; 3],
    // Attribute of the accepted write still waiting for its completion
    pending_write: Option<AttributeId>,
}

impl<T: Transport, K: Timers, P: Presenter> StrapController<T, K, P> {
    pub fn new(
        config: &LinkConfig,
        transport: T,
        timers: K,
        presenter: P,
    ) -> Result<Self, ConfigError> {
        let endpoints = EndpointTable::from_config(&config.endpoints)?;
        let timing = config.timing();

        Ok(Self {
            transport,
            timers,
            presenter,
            monitor: ConnectionMonitor::default(),
            scheduler: RequestScheduler::new(endpoints, timing),
            timing,
            armed: [None; 3],
            pending_write: None,
        })
    }

    /// Set up the transport and schedule the first connection check.
    pub fn start(&mut self) {
        info!(
            "Starting strap link with {} endpoints",
            self.scheduler.endpoints().len()
        );

        self.transport.create_attribute(RAW_DATA, RAW_DATA_LEN);
        self.transport.create_attribute(BAT_CHG, BAT_CHG_LEN);
        self.transport.create_attribute(NFC_GET_UID, NFC_UID_LEN);
        for endpoint in self.scheduler.endpoints().iter() {
            self.transport
                .create_attribute(endpoint.attribute, endpoint.max_len);
        }
        self.transport
            .set_response_timeout(self.timing.transport_timeout);

        self.presenter.connection_changed(self.monitor.state());
        self.arm(Wakeup::CheckConnection, self.timing.initial_check);
    }

    /// Single dispatch entry for timer wake-ups and transport callbacks.
    pub fn handle(&mut self, event: StrapEvent) {
        match event {
            StrapEvent::Wakeup(wakeup) => {
                // The timer that delivered this is spent
                self.armed[wakeup.slot()] = None;
                self.on_wakeup(wakeup);
            }
            StrapEvent::ReadComplete { attribute, result } => {
                debug!(
                    "did_read({:04x}, {:04x}, {:?})",
                    attribute.service,
                    attribute.attribute,
                    result.as_ref().map(|payload| payload.len())
                );
                self.dispatch(LinkInput::Response { attribute, result });
            }
            StrapEvent::WriteComplete { attribute, result } => {
                self.on_write_complete(attribute, result);
            }
            StrapEvent::Notified(attribute) => {
                if attribute == NFC_GET_UID {
                    debug!("Tag present");
                    self.dispatch(LinkInput::TagPresent(attribute));
                } else {
                    debug!("Ignoring notification from {}", attribute);
                }
            }
            StrapEvent::AvailabilityChanged { service, available } => {
                self.on_availability_changed(service, available);
            }
        }
    }

    fn on_wakeup(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::CheckConnection => self.check_connection(),
            Wakeup::PollTick => {
                if self.scheduler.state() == SchedulerState::Idle {
                    let transport = &self.transport;
                    self.scheduler
                        .endpoints_mut()
                        .refresh(|service| transport.is_service_available(service));
                }
                self.dispatch(LinkInput::PollTick);
            }
            Wakeup::ResponseTimeout => self.dispatch(LinkInput::ResponseTimeout),
        }
    }

    fn check_connection(&mut self) {
        let observation = self.monitor.poll(&self.transport);

        match observation.state {
            ConnectionState::Connected => {
                if observation.changed {
                    self.presenter.connection_changed(observation.state);
                }
                self.dispatch(LinkInput::Connected);
            }
            ConnectionState::Disconnected => {
                self.presenter.connection_changed(observation.state);
                self.go_offline();
            }
        }
    }

    fn go_offline(&mut self) {
        self.disarm(Wakeup::PollTick);
        self.dispatch(LinkInput::Disconnected);
        self.arm(Wakeup::CheckConnection, self.timing.reconnect_interval);
    }

    fn on_availability_changed(&mut self, service: ServiceId, available: bool) {
        match self.monitor.on_availability_changed(service, available) {
            AvailabilityAction::ForceDisconnect => {
                self.presenter.connection_changed(ConnectionState::Disconnected);
                self.go_offline();
            }
            AvailabilityAction::MarkEndpoints { service, available } => {
                let matched = self
                    .scheduler
                    .endpoints_mut()
                    .mark_available(service, available);
                debug!(
                    "Service {:04x} available: {} ({} endpoints)",
                    service, available, matched
                );
            }
            AvailabilityAction::Ignore => {}
        }
    }

    fn on_write_complete(
        &mut self,
        attribute: AttributeId,
        result: Result<(), TransportError>,
    ) {
        if self.pending_write != Some(attribute) {
            debug!("Dropping unrequested write completion for {}", attribute);
            return;
        }
        self.pending_write = None;

        match result {
            Ok(()) => info!("Write to {} acknowledged", attribute),
            Err(e) => warn!("Write to {} failed: {}", attribute, e),
        }
        self.presenter.write_acknowledged(attribute, result);
    }

    /// Feed an input to the scheduler and carry out what it asks for.
    fn dispatch(&mut self, input: LinkInput) {
        let mut next = Some(input);

        while let Some(input) = next.take() {
            for output in self.scheduler.handle_input(input) {
                match output {
                    LinkOutput::IssueRead(target) => {
                        let attribute = target.attribute();
                        next = Some(match self.transport.issue_read(attribute) {
                            Ok(()) => {
                                debug!("Reading {}", attribute);
                                LinkInput::Issued(target)
                            }
                            Err(error) => LinkInput::IssueFailed { target, error },
                        });
                    }
                    LinkOutput::Schedule { wakeup, delay } => self.arm(wakeup, delay),
                    LinkOutput::CancelResponseTimeout => self.disarm(Wakeup::ResponseTimeout),
                    LinkOutput::ReadingsUpdated => {
                        self.presenter.readings_updated(self.scheduler.readings())
                    }
                }
            }
        }
    }

    fn arm(&mut self, wakeup: Wakeup, delay: Duration) {
        self.disarm(wakeup);
        let handle = self.timers.schedule(delay, wakeup);
        self.armed[wakeup.slot()] = Some(handle);
    }

    fn disarm(&mut self, wakeup: Wakeup) {
        if let Some(handle) = self.armed[wakeup.slot()].take() {
            self.timers.cancel(handle);
        }
    }

    /// Fire-and-forget write. A `WriteComplete` event follows on success.
    ///
    /// Writes rejected up front are logged and reported to the presenter.
    pub fn request_write(
        &mut self,
        attribute: AttributeId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let result = if self.monitor.is_connected() {
            self.transport.issue_write(attribute, payload)
        } else {
            Err(TransportError::NotPresent)
        };

        match result {
            Ok(()) => {
                debug!("Writing {} bytes to {}", payload.len(), attribute);
                self.pending_write = Some(attribute);
            }
            Err(e) => {
                warn!("Cannot write to {}: {}", attribute, e);
                self.presenter.write_acknowledged(attribute, Err(e));
            }
        }
        result
    }

    /// Toggle charging on the strap battery.
    pub fn set_charging(&mut self, enabled: bool) -> Result<(), TransportError> {
        info!("Setting charging {}", if enabled { "on" } else { "off" });
        self.request_write(BAT_CHG, &[u8::from(enabled)])
    }

    pub fn snapshot(&self) -> &DecodedReadings {
        self.scheduler.readings()
    }

    pub fn connection(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn endpoints(&self) -> &EndpointTable {
        self.scheduler.endpoints()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn timers(&self) -> &K {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut K {
        &mut self.timers
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Cancel every armed timer and hand back the collaborators.
    pub fn shutdown(mut self) -> (T, K, P) {
        for wakeup in Wakeup::ALL {
            self.disarm(wakeup);
        }
        info!("Strap link stopped");
        (self.transport, self.timers, self.presenter)
    }
}
