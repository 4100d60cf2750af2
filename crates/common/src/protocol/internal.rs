// Envelopes exchanged with the downstream processor over HTTP.

use serde::{Deserialize, Serialize};
use serde_json::{value::RawValue, Map, Value};

/// Body of `POST /internal/send-message`.
///
/// Both fields are optional at the serde level so that a body with a
/// missing field still parses and can be rejected with a precise reason
/// instead of a generic decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

impl SendMessageRequest {
    pub fn new(client_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self { client_id: Some(client_id.into()), payload: Some(payload) }
    }
}

/// Body of `POST {processor}/api/v1/process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardEnvelope {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub message: Box<RawValue>,
}

impl ForwardEnvelope {
    /// Wraps a raw client frame. Frames that already hold a JSON document are
    /// embedded as-is; anything else travels as a JSON string (lossy UTF-8
    /// for binary input).
    pub fn from_frame(client_id: impl Into<String>, raw: &[u8]) -> Result<Self, serde_json::Error> {
        let embedded = std::str::from_utf8(raw)
            .ok()
            .and_then(|text| serde_json::from_str::<&RawValue>(text).ok())
            .map(ToOwned::to_owned);

        let message = match embedded {
            Some(message) => message,
            None => {
                let as_string = serde_json::to_string(&String::from_utf8_lossy(raw))?;
                RawValue::from_string(as_string)?
            }
        };

        Ok(Self { client_id: client_id.into(), message })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_frame_is_embedded_verbatim() {
        let envelope = ForwardEnvelope::from_frame("abc", br#"{"kind":"status","ok":true}"#)
            .expect("json frame should wrap");
        let encoded = serde_json::to_string(&envelope).expect("envelope should encode");
        assert_eq!(encoded, r#"{"clientId":"abc","message":{"kind":"status","ok":true}}"#);
    }

    #[test]
    fn plain_text_frame_becomes_json_string() {
        let envelope = ForwardEnvelope::from_frame("abc", b"ping").expect("text frame should wrap");
        let value = serde_json::to_value(&envelope).expect("envelope should encode");
        assert_eq!(value, json!({ "clientId": "abc", "message": "ping" }));
    }

    #[test]
    fn quoted_json_string_frame_is_not_double_encoded() {
        let envelope =
            ForwardEnvelope::from_frame("abc", br#""ping""#).expect("json string should wrap");
        assert_eq!(envelope.message.get(), r#""ping""#);
    }

    #[test]
    fn binary_frame_is_lossy_decoded() {
        let envelope =
            ForwardEnvelope::from_frame("abc", &[0x68, 0x69, 0xff]).expect("binary should wrap");
        let value = serde_json::to_value(&envelope).expect("envelope should encode");
        assert_eq!(value["message"], json!("hi\u{fffd}"));
    }

    #[test]
    fn send_message_request_tolerates_missing_fields() {
        let parsed: SendMessageRequest =
            serde_json::from_str(r#"{"clientId":"abc"}"#).expect("partial body should parse");
        assert_eq!(parsed.client_id.as_deref(), Some("abc"));
        assert!(parsed.payload.is_none());
    }

    #[test]
    fn send_message_request_rejects_non_object_payload() {
        let parsed = serde_json::from_str::<SendMessageRequest>(
            r#"{"clientId":"abc","payload":"not-an-object"}"#,
        );
        assert!(parsed.is_err());
    }
}
