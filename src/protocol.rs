use crate::types::{
    AttributeId, TagId, BAT_V, GPS_ALTITUDE, GPS_FIX_QUALITY, GPS_LOCATION, GPS_SATELLITES,
    GPS_SPEED, NFC_GET_UID, TAG_ID_LEN,
};
use log::{debug, warn};

/// A typed value decoded from an attribute payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedField {
    /// Volts x100
    BatteryVoltage(u16),
    /// Degrees x10^7, latitude first on the wire
    Location { latitude: i32, longitude: i32 },
    /// Metres per second x100
    Speed(u16),
    /// Metres x100
    Altitude(u16),
    /// NMEA GGA fix quality
    FixQuality(u8),
    Satellites(u8),
    TagId(TagId),
}

/// Smallest payload accepted for each known attribute.
pub fn min_payload_len(attribute: AttributeId) -> Option<usize> {
    match attribute {
        BAT_V => Some(2),
        GPS_LOCATION => Some(8),
        GPS_SPEED => Some(2),
        GPS_ALTITUDE => Some(2),
        GPS_FIX_QUALITY => Some(1),
        GPS_SATELLITES => Some(1),
        NFC_GET_UID => Some(0),
        _ => None,
    }
}

fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn le_i32(data: &[u8], offset: usize) -> Option<i32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode a read payload for the given attribute.
///
/// Multi-byte values are little-endian. Unknown attributes and payloads
/// shorter than the attribute's minimum yield `None`.
pub fn decode(attribute: AttributeId, data: &[u8]) -> Option<DecodedField> {
    let Some(min_len) = min_payload_len(attribute) else {
        debug!("Ignoring payload for unknown attribute {}", attribute);
        return None;
    };

    if data.len() < min_len {
        warn!(
            "Ignoring {} byte payload for {}: need at least {}",
            data.len(),
            attribute,
            min_len
        );
        return None;
    }

    let field = match attribute {
        BAT_V => DecodedField::BatteryVoltage(le_u16(data, 0)?),
        GPS_LOCATION => DecodedField::Location {
            latitude: le_i32(data, 0)?,
            longitude: le_i32(data, 4)?,
        },
        GPS_SPEED => DecodedField::Speed(le_u16(data, 0)?),
        GPS_ALTITUDE => DecodedField::Altitude(le_u16(data, 0)?),
        GPS_FIX_QUALITY => DecodedField::FixQuality(data[0]),
        GPS_SATELLITES => DecodedField::Satellites(data[0]),
        NFC_GET_UID => {
            // An empty payload means the tag left the field
            let len = data.len().min(TAG_ID_LEN);
            let mut tag = [0u8; TAG_ID_LEN];
            tag[..len].copy_from_slice(&data[..len]);
            DecodedField::TagId(tag)
        }
        _ => return None,
    };

    Some(field)
}
