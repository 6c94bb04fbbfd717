//! Simulated Xadow strap for running the link on a host
//!
//! Reads complete through the event channel with synthetic battery, GPS
//! and tag payloads. The strap shows up a short while after start and
//! now and then reports busy.

use crate::runtime::EventChannel;
use crate::strap::traits::{Transport, TransportError};
use crate::system::events::StrapEvent;
use crate::types::{
    AttributeId, ServiceId, BAT_V, GPS_ALTITUDE, GPS_FIX_QUALITY, GPS_LOCATION, GPS_SATELLITES,
    GPS_SPEED, NFC_GET_UID, RAW_DATA_SERVICE, SERVICE_BAT, SERVICE_GPS, SERVICE_NFC,
};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};

const SERVICES: [ServiceId; 4] = [RAW_DATA_SERVICE, SERVICE_GPS, SERVICE_BAT, SERVICE_NFC];

pub const ATTACH_DELAY: Duration = Duration::from_secs(2);
const TAG_INTERVAL: Duration = Duration::from_secs(10);

// Every nth read is refused as busy
const BUSY_EVERY: u32 = 7;

const TAG_UID: [u8; 7] = [0x04, 0xA2, 0x3B, 0x7C, 0x91, 0x5E, 0x80];

// Pebble HQ, Palo Alto
const BASE_LATITUDE: i32 = 374_400_662;
const BASE_LONGITUDE: i32 = -1_221_583_808;

pub struct SimulatedStrap<'a> {
    events: &'a EventChannel,
    attached_at: Instant,
    reads: u32,
}

impl<'a> SimulatedStrap<'a> {
    pub fn new(events: &'a EventChannel) -> Self {
        Self {
            events,
            attached_at: Instant::now() + ATTACH_DELAY,
            reads: 0,
        }
    }

    fn attached(&self) -> bool {
        Instant::now() >= self.attached_at
    }

    fn payload(&self, attribute: AttributeId) -> Option<heapless::Vec<u8, 16>> {
        let drift = (self.reads % 20) as u16;
        let mut data = heapless::Vec::new();
        match attribute {
            BAT_V => data.extend_from_slice(&(398 + drift).to_le_bytes()).ok()?,
            GPS_LOCATION => {
                let offset = i32::from(drift) * 10;
                data.extend_from_slice(&(BASE_LATITUDE + offset).to_le_bytes()).ok()?;
                data.extend_from_slice(&(BASE_LONGITUDE - offset).to_le_bytes()).ok()?;
            }
            GPS_SPEED => data.extend_from_slice(&150u16.to_le_bytes()).ok()?,
            GPS_ALTITUDE => data.extend_from_slice(&2350u16.to_le_bytes()).ok()?,
            GPS_FIX_QUALITY => data.push(1).ok()?,
            GPS_SATELLITES => data.push(7).ok()?,
            NFC_GET_UID => data.extend_from_slice(&TAG_UID).ok()?,
            _ => return None,
        }
        Some(data)
    }
}

impl Transport for SimulatedStrap<'_> {
    fn is_service_available(&self, service: ServiceId) -> bool {
        self.attached() && SERVICES.contains(&service)
    }

    fn issue_read(&mut self, attribute: AttributeId) -> Result<(), TransportError> {
        if !self.attached() {
            return Err(TransportError::NotPresent);
        }

        self.reads += 1;
        if self.reads % BUSY_EVERY == 0 {
            return Err(TransportError::Busy);
        }

        let data = self
            .payload(attribute)
            .ok_or(TransportError::AttributeUnsupported)?;
        self.events
            .try_send(StrapEvent::read_ok(attribute, &data))
            .map_err(|_| TransportError::Busy)
    }

    fn issue_write(
        &mut self,
        attribute: AttributeId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.attached() {
            return Err(TransportError::NotPresent);
        }

        info!("Strap received {:02x?} on {}", payload, attribute);
        self.events
            .try_send(StrapEvent::WriteComplete {
                attribute,
                result: Ok(()),
            })
            .map_err(|_| TransportError::Busy)
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        debug!("Strap response timeout {}ms", timeout.as_millis());
    }

    fn create_attribute(&mut self, attribute: AttributeId, buffer_len: usize) {
        debug!("Created attribute {} ({} bytes)", attribute, buffer_len);
    }
}

/// Out-of-band strap activity: service announcements once attached, then a
/// tag tap every few seconds.
pub async fn accessory_task(events: &EventChannel) {
    Timer::after(ATTACH_DELAY).await;
    info!("Simulated strap attached");

    for service in [SERVICE_GPS, SERVICE_BAT, SERVICE_NFC] {
        events
            .send(StrapEvent::AvailabilityChanged {
                service,
                available: true,
            })
            .await;
    }

    loop {
        Timer::after(TAG_INTERVAL).await;
        if events.try_send(StrapEvent::Notified(NFC_GET_UID)).is_err() {
            warn!("Event queue full, tag notification lost");
        }
    }
}
