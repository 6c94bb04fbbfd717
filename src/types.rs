use crate::format::{format_scaled, FormatError, Numeric};
use crate::protocol::DecodedField;
use core::fmt;
use serde::{Deserialize, Serialize};

pub type ServiceId = u16;

/// A readable or writable data item on the strap, addressed by service and attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeId {
    pub service: ServiceId,
    pub attribute: u16,
}

impl AttributeId {
    pub const fn new(service: ServiceId, attribute: u16) -> Self {
        Self { service, attribute }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}/{:04x}", self.service, self.attribute)
    }
}

// Service ids as exposed by the Xadow strap firmware
pub const RAW_DATA_SERVICE: ServiceId = 0x0000;
pub const SERVICE_GPS: ServiceId = 0x2001;
pub const SERVICE_BAT: ServiceId = 0x2003;
pub const SERVICE_NFC: ServiceId = 0x2004;

pub const RAW_DATA: AttributeId = AttributeId::new(RAW_DATA_SERVICE, 0x0000);
pub const BAT_V: AttributeId = AttributeId::new(SERVICE_BAT, 0x1001);
pub const BAT_CHG: AttributeId = AttributeId::new(SERVICE_BAT, 0x1002);
pub const GPS_LOCATION: AttributeId = AttributeId::new(SERVICE_GPS, 0x0001);
pub const GPS_SPEED: AttributeId = AttributeId::new(SERVICE_GPS, 0x0003);
pub const GPS_ALTITUDE: AttributeId = AttributeId::new(SERVICE_GPS, 0x0101);
pub const GPS_FIX_QUALITY: AttributeId = AttributeId::new(SERVICE_GPS, 0x0102);
pub const GPS_SATELLITES: AttributeId = AttributeId::new(SERVICE_GPS, 0x0103);
pub const NFC_GET_UID: AttributeId = AttributeId::new(SERVICE_NFC, 0x0001);

// Transport buffer sizes for the attributes that are not polled round-robin
pub const RAW_DATA_LEN: usize = 100;
pub const BAT_CHG_LEN: usize = 4;
pub const NFC_UID_LEN: usize = 10;

pub const MAX_ENDPOINTS: usize = 20;
pub const MAX_PAYLOAD_LEN: usize = RAW_DATA_LEN;
pub const TAG_ID_LEN: usize = 16;

/// Bytes delivered with a read completion.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

pub type TagId = [u8; TAG_ID_LEN];

// (input, output) precision pairs used when rendering decoded values
const VOLTAGE_PRECISION: (u8, u8) = (2, 1);
const COORDINATE_PRECISION: (u8, u8) = (7, 4);
const SPEED_PRECISION: (u8, u8) = (2, 2);
const ALTITUDE_PRECISION: (u8, u8) = (2, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::Disconnected => f.write_str("Connecting..."),
        }
    }
}

/// Last known values read from the strap.
///
/// Fields are updated in place as reads complete and are kept across
/// disconnects, so a presenter may show stale values next to a
/// "connecting" indicator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedReadings {
    /// Battery voltage in V/100
    pub battery_cv: u16,
    pub battery_voltage: Numeric,
    /// Latitude in degrees/10^7
    pub latitude_e7: i32,
    /// Longitude in degrees/10^7
    pub longitude_e7: i32,
    pub latitude: Numeric,
    pub longitude: Numeric,
    /// Speed in m/s/100
    pub speed_cms: u16,
    pub speed: Numeric,
    /// Altitude in m/100
    pub altitude_cm: u16,
    pub altitude: Numeric,
    pub fix_quality: u8,
    pub satellites: u8,
    /// All zeros when no tag has been read
    pub tag_id: TagId,
}

impl DecodedReadings {
    /// Store a decoded field, rendering its display string.
    ///
    /// Nothing is changed if rendering fails.
    pub fn apply(&mut self, field: DecodedField) -> Result<(), FormatError> {
        match field {
            DecodedField::BatteryVoltage(cv) => {
                let (input, output) = VOLTAGE_PRECISION;
                self.battery_voltage = format_scaled(i32::from(cv), input, output)?;
                self.battery_cv = cv;
            }
            DecodedField::Location {
                latitude,
                longitude,
            } => {
                let (input, output) = COORDINATE_PRECISION;
                let latitude_text = format_scaled(latitude, input, output)?;
                let longitude_text = format_scaled(longitude, input, output)?;
                self.latitude_e7 = latitude;
                self.longitude_e7 = longitude;
                self.latitude = latitude_text;
                self.longitude = longitude_text;
            }
            DecodedField::Speed(cms) => {
                let (input, output) = SPEED_PRECISION;
                self.speed = format_scaled(i32::from(cms), input, output)?;
                self.speed_cms = cms;
            }
            DecodedField::Altitude(cm) => {
                let (input, output) = ALTITUDE_PRECISION;
                self.altitude = format_scaled(i32::from(cm), input, output)?;
                self.altitude_cm = cm;
            }
            DecodedField::FixQuality(fix) => self.fix_quality = fix,
            DecodedField::Satellites(count) => self.satellites = count,
            DecodedField::TagId(tag) => self.tag_id = tag,
        }
        Ok(())
    }

    pub fn has_tag(&self) -> bool {
        self.tag_id.iter().any(|&b| b != 0)
    }
}

impl fmt::Display for DecodedReadings {
    /// Renders the data panel text shown while connected.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VBAT: {}\nGPS:\nlat: {} lon: {}\nvel: {} alt: {}\nfix: {} sat. in view: {}\n\nNFC TAG ID:\n {:02X} {:02X} {:02X} {:02X}",
            self.battery_voltage,
            self.latitude,
            self.longitude,
            self.speed,
            self.altitude,
            self.fix_quality,
            self.satellites,
            self.tag_id[0],
            self.tag_id[1],
            self.tag_id[2],
            self.tag_id[3],
        )
    }
}
