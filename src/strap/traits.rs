//! Collaborator interfaces for the link core
//!
//! The core never touches the physical strap link, the event loop, or the
//! display directly. It talks to a `Transport`, schedules callbacks through
//! `Timers`, and reports to a `Presenter`.

use crate::system::events::Wakeup;
use crate::types::{AttributeId, ConnectionState, DecodedReadings, ServiceId};
use embassy_time::Duration;
use thiserror::Error;

/// Results a strap transport can report, other than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport busy")]
    Busy,
    #[error("request timed out")]
    Timeout,
    #[error("strap not present")]
    NotPresent,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("attribute unsupported")]
    AttributeUnsupported,
    #[error("invalid arguments")]
    InvalidArgs,
}

/// How the scheduler reacts to a failed read issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try the same read again shortly
    Busy,
    /// The strap may be gone, verify the connection
    Timeout,
    /// Back off and stop polling the endpoint until it is announced again
    Unavailable,
}

impl TransportError {
    pub fn class(self) -> ErrorClass {
        match self {
            TransportError::Busy => ErrorClass::Busy,
            TransportError::Timeout => ErrorClass::Timeout,
            TransportError::NotPresent
            | TransportError::ServiceUnavailable
            | TransportError::AttributeUnsupported
            | TransportError::InvalidArgs => ErrorClass::Unavailable,
        }
    }
}

/// Request side of the strap link.
///
/// Completions, notifications and availability changes come back as
/// `StrapEvent`s through the event loop.
pub trait Transport {
    fn is_service_available(&self, service: ServiceId) -> bool;

    /// Submit a read. `Ok` means a `ReadComplete` event will follow.
    fn issue_read(&mut self, attribute: AttributeId) -> Result<(), TransportError>;

    /// Submit a write. `Ok` means a `WriteComplete` event will follow.
    fn issue_write(
        &mut self,
        attribute: AttributeId,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    fn set_response_timeout(&mut self, timeout: Duration);

    /// Reserve a buffer for an attribute before it is first used.
    fn create_attribute(&mut self, _attribute: AttributeId, _buffer_len: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u32);

/// One-shot timer primitive of the event loop.
pub trait Timers {
    /// Arrange for `StrapEvent::Wakeup(wakeup)` to be delivered after `delay`.
    fn schedule(&mut self, delay: Duration, wakeup: Wakeup) -> TimerHandle;

    fn cancel(&mut self, handle: TimerHandle);
}

/// Consumer of connection state and readings, typically a UI.
pub trait Presenter {
    fn connection_changed(&mut self, state: ConnectionState);

    fn readings_updated(&mut self, readings: &DecodedReadings);

    /// Outcome of a user-triggered write.
    fn write_acknowledged(
        &mut self,
        _attribute: AttributeId,
        _result: Result<(), TransportError>,
    ) {
    }
}
