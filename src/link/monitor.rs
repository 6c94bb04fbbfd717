//! Tracks whether the strap is attached
//!
//! The strap counts as connected while its base service is reported
//! available by the transport.

use crate::strap::traits::Transport;
use crate::types::{ConnectionState, ServiceId, RAW_DATA_SERVICE};
use log::{debug, info};

/// Result of one connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub state: ConnectionState,
    pub changed: bool,
}

/// What to do with an availability notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityAction {
    /// The base service went away
    ForceDisconnect,
    /// Update the endpoints of a non-base service
    MarkEndpoints { service: ServiceId, available: bool },
    Ignore,
}

#[derive(Debug)]
pub struct ConnectionMonitor {
    base_service: ServiceId,
    state: ConnectionState,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new(RAW_DATA_SERVICE)
    }
}

impl ConnectionMonitor {
    pub fn new(base_service: ServiceId) -> Self {
        Self {
            base_service,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Ask the transport whether the base service is present.
    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &T) -> Observation {
        let state = if transport.is_service_available(self.base_service) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.observe(state)
    }

    pub fn on_availability_changed(
        &mut self,
        service: ServiceId,
        available: bool,
    ) -> AvailabilityAction {
        if service != self.base_service {
            return AvailabilityAction::MarkEndpoints { service, available };
        }

        if available {
            // The next scheduled check picks it up
            debug!("Base service {:04x} announced", service);
            AvailabilityAction::Ignore
        } else {
            self.observe(ConnectionState::Disconnected);
            AvailabilityAction::ForceDisconnect
        }
    }

    fn observe(&mut self, state: ConnectionState) -> Observation {
        let changed = self.state != state;
        if changed {
            match state {
                ConnectionState::Connected => info!("Strap connected"),
                ConnectionState::Disconnected => info!("Strap disconnected"),
            }
        }
        self.state = state;
        Observation { state, changed }
    }
}
