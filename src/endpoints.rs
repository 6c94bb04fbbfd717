//! Round-robin registry of readable strap attributes
//!
//! Registration order is polling order. Capacity is fixed at
//! `MAX_ENDPOINTS` and the table never grows once set up.

use crate::system::config::EndpointConfig;
use crate::types::{AttributeId, ServiceId, MAX_ENDPOINTS};
use log::debug;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle(usize);

impl EndpointHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub attribute: AttributeId,
    pub max_len: usize,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("endpoint table is full")]
pub struct TableFull;

#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: heapless::Vec<Endpoint, MAX_ENDPOINTS>,
    cursor: usize,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &[EndpointConfig]) -> Result<Self, TableFull> {
        let mut table = Self::new();
        for entry in entries {
            table.register(entry.attribute(), entry.max_len)?;
        }
        Ok(table)
    }

    /// Add an endpoint at the end of the polling order. New endpoints start available.
    pub fn register(
        &mut self,
        attribute: AttributeId,
        max_len: usize,
    ) -> Result<EndpointHandle, TableFull> {
        let handle = EndpointHandle(self.endpoints.len());
        self.endpoints
            .push(Endpoint {
                attribute,
                max_len,
                available: true,
            })
            .map_err(|_| TableFull)?;
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn get(&self, handle: EndpointHandle) -> Option<&Endpoint> {
        self.endpoints.get(handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Set availability of every endpoint belonging to `service`.
    ///
    /// Returns how many endpoints matched.
    pub fn mark_available(&mut self, service: ServiceId, available: bool) -> usize {
        let mut matched = 0;
        for endpoint in self
            .endpoints
            .iter_mut()
            .filter(|e| e.attribute.service == service)
        {
            endpoint.available = available;
            matched += 1;
        }
        matched
    }

    pub fn mark_endpoint_unavailable(&mut self, handle: EndpointHandle) {
        if let Some(endpoint) = self.endpoints.get_mut(handle.0) {
            endpoint.available = false;
        }
    }

    /// Clear the flag on endpoints whose service is no longer present.
    pub fn refresh(&mut self, mut service_present: impl FnMut(ServiceId) -> bool) {
        for endpoint in self.endpoints.iter_mut().filter(|e| e.available) {
            if !service_present(endpoint.attribute.service) {
                debug!("{} is not available", endpoint.attribute);
                endpoint.available = false;
            }
        }
    }

    /// Find the first available endpoint at or after the cursor and park the
    /// cursor on it.
    ///
    /// Scans each endpoint at most once. The cursor is left untouched when
    /// nothing is available.
    pub fn select_available(&mut self) -> Option<EndpointHandle> {
        let len = self.endpoints.len();
        let found = (0..len)
            .map(|step| (self.cursor + step) % len)
            .find(|&index| self.endpoints[index].available)?;
        self.cursor = found;
        Some(EndpointHandle(found))
    }

    /// Move the cursor past the current endpoint.
    pub fn advance(&mut self) {
        if !self.endpoints.is_empty() {
            self.cursor = (self.cursor + 1) % self.endpoints.len();
        }
    }

    /// Select the next available endpoint and move past it.
    pub fn next_available(&mut self) -> Option<EndpointHandle> {
        let handle = self.select_available()?;
        self.advance();
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BAT_V, GPS_LOCATION, GPS_SPEED, SERVICE_BAT, SERVICE_GPS};

    fn table() -> EndpointTable {
        let mut table = EndpointTable::new();
        table.register(BAT_V, 4).unwrap();
        table.register(GPS_LOCATION, 16).unwrap();
        table.register(GPS_SPEED, 4).unwrap();
        table
    }

    fn next(table: &mut EndpointTable) -> Option<AttributeId> {
        let handle = table.next_available()?;
        table.get(handle).map(|e| e.attribute)
    }

    fn select(table: &mut EndpointTable) -> Option<AttributeId> {
        let handle = table.select_available()?;
        table.get(handle).map(|e| e.attribute)
    }

    #[test]
    fn test_round_robin_wraps_in_registration_order() {
        let mut table = table();
        let mut seen = Vec::new();
        for _ in 0..table.len() + 1 {
            seen.push(next(&mut table).unwrap());
        }
        assert_eq!(seen, vec![BAT_V, GPS_LOCATION, GPS_SPEED, BAT_V]);
        assert_eq!(table.cursor(), 1);
    }

    #[test]
    fn test_nothing_available() {
        let mut table = table();
        table.next_available();
        assert_eq!(table.cursor(), 1);

        table.mark_available(SERVICE_BAT, false);
        table.mark_available(SERVICE_GPS, false);
        assert_eq!(table.next_available(), None);
        assert_eq!(table.cursor(), 1);
    }

    #[test]
    fn test_empty_table() {
        let mut table = EndpointTable::new();
        assert!(table.is_empty());
        assert_eq!(table.next_available(), None);
        table.advance();
        assert_eq!(table.cursor(), 0);
    }

    #[test]
    fn test_unavailable_endpoints_are_skipped() {
        let mut table = table();
        assert_eq!(table.mark_available(SERVICE_GPS, false), 2);

        assert_eq!(next(&mut table), Some(BAT_V));
        assert_eq!(next(&mut table), Some(BAT_V));

        assert_eq!(table.mark_available(SERVICE_GPS, true), 2);
        assert_eq!(next(&mut table), Some(GPS_LOCATION));
    }

    #[test]
    fn test_select_does_not_advance() {
        let mut table = table();
        let first = table.select_available();
        assert_eq!(table.select_available(), first);
        table.advance();
        assert_eq!(select(&mut table), Some(GPS_LOCATION));
    }

    #[test]
    fn test_select_parks_cursor_on_found_endpoint() {
        let mut table = table();
        let location = EndpointHandle(1);
        table.mark_endpoint_unavailable(location);
        table.advance();
        assert_eq!(select(&mut table), Some(GPS_SPEED));
        assert_eq!(table.cursor(), 2);
    }

    #[test]
    fn test_refresh_drops_vanished_services() {
        let mut table = table();
        table.refresh(|service| service == SERVICE_BAT);
        let flags: Vec<bool> = table.iter().map(|e| e.available).collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn test_capacity_is_fixed() {
        let mut table = EndpointTable::new();
        for attribute in 0..MAX_ENDPOINTS as u16 {
            table.register(AttributeId::new(SERVICE_GPS, attribute), 4).unwrap();
        }
        assert_eq!(table.register(BAT_V, 4), Err(TableFull));
        assert_eq!(table.len(), MAX_ENDPOINTS);
    }
}
