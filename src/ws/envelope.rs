use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::WsError;
use crate::Result;

/// Envelope type used by the heartbeat.
pub const PING: &str = "ping";

/// The unit exchanged over the wire: `{"type": ..., "payload": ...}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing key; every distinct value is its own listener channel
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Application-defined body
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    #[must_use]
    pub fn new<S: Into<String>>(msg_type: S, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }

    /// Keep-alive envelope carrying a Unix timestamp in milliseconds.
    #[must_use]
    pub fn ping(timestamp: i64) -> Self {
        Self::new(PING, json!({ "timestamp": timestamp }))
    }

    /// Try to extract the payload as `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(|e| WsError::MessageParse(e).into())
    }
}

/// A decoded inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The frame was a well-formed envelope
    Envelope(Envelope),
    /// Anything else, delivered untouched
    Raw(String),
}

/// Decode an inbound text frame, falling back to the raw text when it is not an envelope.
#[must_use]
pub fn decode(text: String) -> Inbound {
    match serde_json::from_str::<Envelope>(&text) {
        Ok(envelope) => Inbound::Envelope(envelope),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(%text, error = %e, "Frame is not an envelope, delivering raw");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            Inbound::Raw(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[test]
    fn serializes_type_before_payload() {
        let envelope = Envelope::new("ping-test", json!({}));
        let text = serde_json::to_string(&envelope).unwrap();

        assert_eq!(text, r#"{"type":"ping-test","payload":{}}"#);
    }

    #[test]
    fn ping_carries_timestamp() {
        let envelope = Envelope::ping(1_700_000_000_000);

        assert_eq!(envelope.msg_type, "ping");
        assert_eq!(envelope.payload["timestamp"], 1_700_000_000_000_i64);
    }

    #[test]
    fn decodes_envelope() {
        let inbound = decode(r#"{"type":"tool_result","payload":{"ok":true}}"#.to_owned());

        let Inbound::Envelope(envelope) = inbound else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.msg_type, "tool_result");
        assert_eq!(envelope.payload, json!({ "ok": true }));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let inbound = decode(r#"{"type":"status"}"#.to_owned());

        assert_eq!(inbound, Inbound::Envelope(Envelope::new("status", Value::Null)));
    }

    #[test]
    fn non_json_falls_back_to_raw() {
        let inbound = decode("hello there".to_owned());
        assert_eq!(inbound, Inbound::Raw("hello there".to_owned()));
    }

    #[test]
    fn json_without_type_falls_back_to_raw() {
        assert!(matches!(decode(r#"{"payload":1}"#.to_owned()), Inbound::Raw(_)));
        assert!(matches!(decode(r#"{"type":7}"#.to_owned()), Inbound::Raw(_)));
        assert!(matches!(decode("[1,2,3]".to_owned()), Inbound::Raw(_)));
    }

    #[test]
    fn payload_as_reports_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Progress {
            percent: u8,
        }

        let good = Envelope::new("progress", json!({ "percent": 40 }));
        assert_eq!(good.payload_as::<Progress>().unwrap().percent, 40);

        let bad = Envelope::new("progress", json!({ "percent": "forty" }));
        let error = bad.payload_as::<Progress>().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::MessageParse(_))
        ));
    }
}
