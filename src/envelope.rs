// Wire payload carried on the queue, serialized as UTF-8 JSON.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub type Result<T> = std::result::Result<T, EnvelopeError>;

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("failed to serialize envelope")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize envelope")]
    Deserialize(#[source] serde_json::Error),
}

/// One timestamped message from a producer.
///
/// ```
/// use messenger::envelope::Envelope;
///
/// let envelope = Envelope::new("Hello Demo!", 3);
/// let bytes = envelope.encode().expect("encode");
/// let decoded = Envelope::decode(&bytes).expect("decode");
/// assert_eq!(decoded, envelope);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    // Send time in epoch milliseconds.
    pub timestamp: u64,
    // Originating producer's position in the pool at creation time.
    // Not unique over the run's lifetime once the pool has churned.
    pub slot: usize,
}

impl Envelope {
    // Capture the send time at construction.
    pub fn new(message: impl Into<String>, slot: usize) -> Self {
        Self {
            message: message.into(),
            timestamp: epoch_millis(),
            slot,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self).map_err(EnvelopeError::Serialize)?;
        Ok(Bytes::from(raw))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(EnvelopeError::Deserialize)
    }
}

fn epoch_millis() -> u64 {
    // The clock predating the epoch would be a host misconfiguration;
    // fall back to zero rather than failing the publish path.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let envelope = Envelope {
            message: "Hello Demo!".to_string(),
            timestamp: 1_724_500_000_000,
            slot: 2,
        };
        let bytes = envelope.encode().expect("encode");
        assert_eq!(Envelope::decode(&bytes).expect("decode"), envelope);
    }

    #[test]
    fn wire_format_uses_the_three_named_fields() {
        let envelope = Envelope {
            message: "hi".to_string(),
            timestamp: 7,
            slot: 1,
        };
        let bytes = envelope.encode().expect("encode");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["timestamp"], 7);
        assert_eq!(value["slot"], 1);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"message":"hi"}"#).is_err());
    }

    #[test]
    fn new_captures_a_recent_timestamp() {
        let before = epoch_millis();
        let envelope = Envelope::new("hi", 1);
        assert!(envelope.timestamp >= before);
    }
}
