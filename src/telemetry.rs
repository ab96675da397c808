use crate::rollup::Position;
use anyhow::Result;
use serde::Deserialize;

/// A reading decoded from the MQTT feed, not yet validated by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    pub sensor_id: String,
    pub value: f64,
    pub position: Option<Position>,
}

#[derive(Debug, Deserialize)]
struct WireReading {
    value: f64,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

pub fn reading_topic_filter(topic_prefix: &str) -> String {
    format!("{topic_prefix}/+/reading")
}

/// Decodes `{prefix}/{sensor_id}/reading`. Topics outside that shape yield
/// `Ok(None)`; a malformed payload on a matching topic is an error.
pub fn parse_reading_payload(
    topic_prefix: &str,
    topic: &str,
    payload: &mut [u8],
) -> Result<Option<ReadingRow>> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() != 3 || parts[0] != topic_prefix || parts[2] != "reading" {
        return Ok(None);
    }
    let sensor_id = parts[1].trim();
    if sensor_id.is_empty() {
        return Ok(None);
    }

    let reading: WireReading = simd_json::serde::from_slice(payload)?;
    // A lone coordinate is ignored rather than half-updating the position.
    let position = match (reading.latitude, reading.longitude) {
        (Some(latitude), Some(longitude)) => Some(Position::new(latitude, longitude)),
        _ => None,
    };

    Ok(Some(ReadingRow {
        sensor_id: sensor_id.to_string(),
        value: reading.value,
        position,
    }))
}
