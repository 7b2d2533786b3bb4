use crate::domain::{LogEvent, Payload, Severity};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

#[derive(Serialize)]
struct WireRecord<'a> {
    level: Severity,
    message: &'a str,
    timestamp: String,
    #[serde(serialize_with = "payload_or_empty")]
    payload: Option<&'a Payload>,
    metadata: WireMetadata<'a>,
}

#[derive(Serialize)]
struct WireMetadata<'a> {
    retry_count: u32,
    batch_id: Option<&'a str>,
}

fn payload_or_empty<S>(payload: &Option<&Payload>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match payload {
        Some(map) => map.serialize(serializer),
        None => serializer.serialize_map(Some(0))?.end(),
    }
}

impl<'a> From<&'a LogEvent> for WireRecord<'a> {
    fn from(event: &'a LogEvent) -> Self {
        Self {
            level: event.level,
            message: &event.message,
            timestamp: format_timestamp(&event.timestamp),
            payload: event.payload.as_ref(),
            metadata: WireMetadata {
                retry_count: event.retry_count,
                batch_id: event.batch_id.as_deref(),
            },
        }
    }
}

/// ISO-8601 UTC with microsecond precision, e.g. `2024-05-01T12:00:00.123456Z`.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Encodes a batch as the JSON array carried by one text frame.
pub fn encode_batch(batch: &[LogEvent]) -> Result<String, SerializationError> {
    if batch.is_empty() {
        return Err(SerializationError::EmptyBatch);
    }
    let records: Vec<WireRecord<'_>> = batch.iter().map(WireRecord::from).collect();
    Ok(serde_json::to_string(&records)?)
}

/// Owned form of a wire record, used when reading frames back.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecodedRecord {
    pub level: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Payload,
    pub metadata: DecodedMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecodedMetadata {
    pub retry_count: u32,
    pub batch_id: Option<String>,
}

impl DecodedRecord {
    pub fn into_event(self) -> LogEvent {
        LogEvent {
            level: self.level,
            message: self.message,
            timestamp: self.timestamp,
            payload: (!self.payload.is_empty()).then_some(self.payload),
            retry_count: self.metadata.retry_count,
            batch_id: self.metadata.batch_id,
        }
    }
}

pub fn decode_batch(frame: &str) -> Result<Vec<DecodedRecord>, SerializationError> {
    Ok(serde_json::from_str(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{Value, json};

    fn fixed_event() -> LogEvent {
        let timestamp = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(123_456))
            .unwrap();
        LogEvent::new(Severity::Warning, "disk almost full").with_timestamp(timestamp)
    }

    #[test]
    fn encodes_wire_shape() {
        let mut event = fixed_event();
        event.retry_count = 2;
        event.batch_id = Some("b-1".to_string());
        event.payload = json!({"disk": "/dev/sda1", "used": 97}).as_object().cloned();

        let encoded = encode_batch(&[event]).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!([{
                "level": "WARNING",
                "message": "disk almost full",
                "timestamp": "2024-05-01T12:00:00.123456Z",
                "payload": {"disk": "/dev/sda1", "used": 97},
                "metadata": {"retry_count": 2, "batch_id": "b-1"}
            }])
        );
    }

    #[test]
    fn missing_payload_and_batch_id_encode_as_empty_object_and_null() {
        let encoded = encode_batch(&[fixed_event()]).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value[0]["payload"], json!({}));
        assert_eq!(value[0]["metadata"]["batch_id"], Value::Null);
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            encode_batch(&[]),
            Err(SerializationError::EmptyBatch)
        ));
    }

    #[test]
    fn decodes_back_into_events() {
        let original = fixed_event();
        let encoded = encode_batch(std::slice::from_ref(&original)).unwrap();
        let decoded = decode_batch(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].clone().into_event(), original);
    }
}
