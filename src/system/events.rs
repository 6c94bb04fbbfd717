//! Inputs delivered to the link core
//!
//! Everything asynchronous (timer expiry, transport completions,
//! notifications, availability changes) reaches the core as a `StrapEvent`
//! through a single dispatch entry point.

use crate::strap::traits::TransportError;
use crate::types::{AttributeId, Payload, ServiceId, MAX_PAYLOAD_LEN};

/// Timer callbacks the core schedules on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wakeup {
    /// Issue the next read
    PollTick,
    /// Re-check whether the strap is still attached
    CheckConnection,
    /// The outstanding read was not answered in time
    ResponseTimeout,
}

impl Wakeup {
    pub const ALL: [Wakeup; 3] = [
        Wakeup::PollTick,
        Wakeup::CheckConnection,
        Wakeup::ResponseTimeout,
    ];

    pub(crate) fn slot(self) -> usize {
        match self {
            Wakeup::PollTick => 0,
            Wakeup::CheckConnection => 1,
            Wakeup::ResponseTimeout => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrapEvent {
    Wakeup(Wakeup),
    ReadComplete {
        attribute: AttributeId,
        result: Result<Payload, TransportError>,
    },
    WriteComplete {
        attribute: AttributeId,
        result: Result<(), TransportError>,
    },
    /// Out-of-band notification raised by the strap
    Notified(AttributeId),
    AvailabilityChanged {
        service: ServiceId,
        available: bool,
    },
}

impl StrapEvent {
    /// Build a successful read completion, truncating oversized payloads.
    pub fn read_ok(attribute: AttributeId, data: &[u8]) -> Self {
        let len = data.len().min(MAX_PAYLOAD_LEN);
        let mut payload = Payload::new();
        let _ = payload.extend_from_slice(&data[..len]);
        StrapEvent::ReadComplete {
            attribute,
            result: Ok(payload),
        }
    }
}
