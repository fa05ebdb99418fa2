//! Message envelopes and the JSON codec
//!
//! Every message on the wire is one JSON object per frame, discriminated by
//! the `kind` field. All envelopes carry the protocol version; decoding
//! rejects any other version so both sides fail fast on skew.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{ProtocolError, Result};

/// Protocol version stamped on every envelope
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Correlation id for requests and responses
///
/// Clients may use numbers or strings; broker-assigned ids are always
/// 24-character secure strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// String form (broker-assigned ids use this)
    String(String),
    /// Numeric form (client-chosen)
    Number(i64),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

/// Wire envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Envelope {
    /// RPC from a peer, relayed to the room host
    Request {
        /// Protocol version
        version: String,
        /// Correlation id, echoed on the reply
        id: MessageId,
        /// Namespaced method name
        method: String,
        /// Positional arguments matching the method signature
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },
    /// Successful reply correlated by `id`
    Response {
        /// Protocol version
        version: String,
        /// Correlation id of the originating request
        id: MessageId,
        /// Method return value
        response: Value,
    },
    /// Error reply correlated by `id`
    ResponseError {
        /// Protocol version
        version: String,
        /// Correlation id of the originating request
        id: MessageId,
        /// Human-readable failure description
        message: String,
    },
    /// Fire-and-forget message to the room host
    Notification {
        /// Protocol version
        version: String,
        /// Namespaced method name
        method: String,
        /// Positional arguments matching the method signature
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },
    /// Fan-out to every room peer except the origin
    Broadcast {
        /// Protocol version
        version: String,
        /// Peer id of the origin, stamped by the broker
        #[serde(rename = "clientId")]
        client_id: String,
        /// Namespaced method name
        method: String,
        /// Positional arguments matching the method signature
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },
    /// Unsolicited broker-originated error
    Error {
        /// Protocol version
        version: String,
        /// Human-readable failure description
        message: String,
    },
}

impl Envelope {
    /// Build a request envelope at the current protocol version
    pub fn request(id: MessageId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Request { version: PROTOCOL_VERSION.to_string(), id, method: method.into(), params }
    }

    /// Build a response envelope
    pub fn response(id: MessageId, response: Value) -> Self {
        Self::Response { version: PROTOCOL_VERSION.to_string(), id, response }
    }

    /// Build an error response envelope
    pub fn response_error(id: MessageId, message: impl Into<String>) -> Self {
        Self::ResponseError { version: PROTOCOL_VERSION.to_string(), id, message: message.into() }
    }

    /// Build a notification envelope
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Notification { version: PROTOCOL_VERSION.to_string(), method: method.into(), params }
    }

    /// Build a broadcast envelope
    ///
    /// The relay overwrites `client_id` with the origin peer's id before
    /// fan-out, so spoofed values never reach other peers.
    pub fn broadcast(
        client_id: impl Into<String>,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self::Broadcast {
            version: PROTOCOL_VERSION.to_string(),
            client_id: client_id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build a broker-originated error envelope
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { version: PROTOCOL_VERSION.to_string(), message: message.into() }
    }

    /// Version carried by this envelope
    pub fn version(&self) -> &str {
        match self {
            Self::Request { version, .. }
            | Self::Response { version, .. }
            | Self::ResponseError { version, .. }
            | Self::Notification { version, .. }
            | Self::Broadcast { version, .. }
            | Self::Error { version, .. } => version,
        }
    }
}

/// Encode an envelope as a single JSON frame
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::SchemaInvalid(e.to_string()))
}

/// Decode a JSON frame into an envelope
///
/// Rejects unparseable input, unknown `kind` values, missing required
/// fields, and any protocol version other than [`PROTOCOL_VERSION`].
pub fn decode(frame: &str) -> Result<Envelope> {
    let envelope: Envelope =
        serde_json::from_str(frame).map_err(|e| ProtocolError::SchemaInvalid(e.to_string()))?;
    if envelope.version() != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION.to_string(),
            actual: envelope.version().to_string(),
        });
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let env = Envelope::request("r1".into(), "peer/init", vec![json!({"protocol": "0.1.0"})]);
        let frame = encode(&env).unwrap();
        assert_eq!(decode(&frame).unwrap(), env);
    }

    #[test]
    fn test_kind_discriminants() {
        let frame = encode(&Envelope::response_error("r1".into(), "boom")).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["kind"], "response-error");

        let frame = encode(&Envelope::broadcast("p1", "editor/update", vec![])).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["kind"], "broadcast");
        assert_eq!(value["clientId"], "p1");
    }

    #[test]
    fn test_params_omitted_when_empty() {
        let frame = encode(&Envelope::notification("peer/info", vec![])).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_decode_numeric_and_string_ids() {
        let env = decode(r#"{"kind":"request","version":"0.1.0","id":7,"method":"peer/init"}"#)
            .unwrap();
        match env {
            Envelope::Request { id, .. } => assert_eq!(id, MessageId::Number(7)),
            other => panic!("expected request, got {:?}", other),
        }

        let env =
            decode(r#"{"kind":"response","version":"0.1.0","id":"abc","response":true}"#).unwrap();
        match env {
            Envelope::Response { id, .. } => assert_eq!(id, MessageId::String("abc".into())),
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let err = decode(r#"{"kind":"ping","version":"0.1.0"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaInvalid(_)));
    }

    #[test]
    fn test_decode_rejects_missing_method() {
        let err = decode(r#"{"kind":"notification","version":"0.1.0"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaInvalid(_)));
    }

    #[test]
    fn test_decode_rejects_missing_id() {
        let err = decode(r#"{"kind":"response","version":"0.1.0","response":null}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaInvalid(_)));
    }

    #[test]
    fn test_decode_rejects_version_mismatch() {
        let err = decode(r#"{"kind":"error","version":"9.9.9","message":"x"}"#).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                actual: "9.9.9".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(ProtocolError::SchemaInvalid(_))));
    }
}
