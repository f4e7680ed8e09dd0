//! Wire envelope types and inbound frame classification.
//!
//! Every frame on the socket is JSON text in one of five shapes:
//!
//! | Shape | Direction | Purpose |
//! |-------|-----------|---------|
//! | `{ id, method, params? }` | relay → peer | operation call |
//! | `{ id, method, result }` | peer → relay | success reply |
//! | `{ id, method, error: { code, message } }` | peer → relay | error reply |
//! | `{ method: "heartbeat" }` / `{ method: "heartbeat", result: { type: "heartbeat_response" } }` | both | liveness probe / ack |
//! | `{ id, method: "tab_update", params }` | peer → relay | unsolicited notification |
//!
//! Heartbeats and notifications live outside the correlation-id cycle:
//! nothing ever waits on their ids.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::CallId;
use crate::peer::tabs::TabNotification;

// ============================================================================
// Constants
// ============================================================================

/// Method name of heartbeat probes and acks.
pub const HEARTBEAT_METHOD: &str = "heartbeat";

/// Payload marker distinguishing an ack from a probe.
pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";

/// Method name of unsolicited tab state notifications.
pub const TAB_UPDATE_METHOD: &str = "tab_update";

// ============================================================================
// RequestEnvelope
// ============================================================================

/// An operation call from the relay to the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id echoed back by the reply.
    pub id: CallId,

    /// Operation name.
    pub method: String,

    /// Operation arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    /// Creates a call envelope with a freshly generated correlation id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        let method = method.into();
        Self {
            id: CallId::generate(&method),
            method,
            params,
        }
    }
}

// ============================================================================
// ReplyEnvelope
// ============================================================================

/// A reply from the peer to the relay, success or error.
///
/// Exactly one of `result` / `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Matches the call's correlation id.
    pub id: CallId,

    /// Operation name of the originating call.
    pub method: String,

    /// Result payload (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Structured failure (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ReplyEnvelope {
    /// Creates a success reply.
    #[inline]
    #[must_use]
    pub fn success(id: CallId, method: impl Into<String>, result: Value) -> Self {
        Self {
            id,
            method: method.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error reply from a crate error.
    #[inline]
    #[must_use]
    pub fn failure(id: CallId, method: impl Into<String>, err: &Error) -> Self {
        Self {
            id,
            method: method.into(),
            result: None,
            error: Some(WireError::from_error(err)),
        }
    }

    /// Returns `true` if this is an error reply.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, converting error replies to [`Error::Peer`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::peer(err.code, err.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// WireError
// ============================================================================

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric error code.
    pub code: i32,

    /// Human-readable message.
    pub message: String,
}

impl WireError {
    /// Converts a crate error into its wire representation.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self {
            code: err.wire_code(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// WireMessage
// ============================================================================

/// One inbound frame, classified.
#[derive(Debug, Clone)]
pub enum WireMessage {
    /// An operation call carrying a correlation id.
    Request(RequestEnvelope),

    /// A reply to a pending call.
    Reply(ReplyEnvelope),

    /// A liveness probe; answer with [`heartbeat_ack`] immediately.
    HeartbeatProbe,

    /// An acknowledgment of a probe we sent; disarms the ack deadline.
    HeartbeatAck,

    /// An unsolicited tab state notification.
    TabUpdate(TabNotification),
}

impl WireMessage {
    /// Classifies one inbound text frame.
    ///
    /// Classification order: heartbeat frames first (they carry no usable
    /// correlation id), then notifications (their id is never awaited), then
    /// replies (id plus result or error), then requests (id plus method).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPeerResponse`] if the frame is not valid
    /// JSON or fits none of the shapes.
    pub fn classify(text: &str) -> Result<Self> {
        let frame: RawFrame =
            serde_json::from_str(text).map_err(|e| Error::malformed(e.to_string()))?;

        if frame.method.as_deref() == Some(HEARTBEAT_METHOD)
            || frame.kind.as_deref() == Some(HEARTBEAT_METHOD)
        {
            let is_ack = frame
                .result
                .as_ref()
                .and_then(|v| v.get("type"))
                .and_then(Value::as_str)
                == Some(HEARTBEAT_RESPONSE)
                || frame.kind.as_deref() == Some(HEARTBEAT_RESPONSE);
            return Ok(if is_ack {
                Self::HeartbeatAck
            } else {
                Self::HeartbeatProbe
            });
        }

        if frame.kind.as_deref() == Some(HEARTBEAT_RESPONSE) {
            return Ok(Self::HeartbeatAck);
        }

        if frame.method.as_deref() == Some(TAB_UPDATE_METHOD) {
            let params = frame.params.unwrap_or(Value::Null);
            let notification = serde_json::from_value(params)
                .map_err(|e| Error::malformed(format!("bad tab_update payload: {e}")))?;
            return Ok(Self::TabUpdate(notification));
        }

        match (frame.id, frame.method) {
            (Some(id), Some(method)) if frame.result.is_some() || frame.error.is_some() => {
                Ok(Self::Reply(ReplyEnvelope {
                    id: CallId::from_wire(id),
                    method,
                    result: frame.result,
                    error: frame.error,
                }))
            }
            (Some(id), Some(method)) => Ok(Self::Request(RequestEnvelope {
                id: CallId::from_wire(id),
                method,
                params: frame.params,
            })),
            _ => Err(Error::malformed("frame fits no known shape")),
        }
    }

    /// Salvages a raw correlation id from a frame that failed to classify.
    ///
    /// Used to reject the matching pending call with a decode error instead
    /// of leaving it to its timeout.
    #[must_use]
    pub fn salvage_id(text: &str) -> Option<CallId> {
        serde_json::from_str::<Value>(text)
            .ok()?
            .get("id")?
            .as_str()
            .map(CallId::from_wire)
    }
}

/// Permissive deserialization target for classification.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    /// Bare `type` field used by heartbeat frames predating envelopes.
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

// ============================================================================
// Heartbeat frames
// ============================================================================

/// Serialized heartbeat probe frame.
#[must_use]
pub fn heartbeat_probe() -> String {
    json!({ "method": HEARTBEAT_METHOD }).to_string()
}

/// Serialized heartbeat acknowledgment frame.
#[must_use]
pub fn heartbeat_ack() -> String {
    json!({
        "method": HEARTBEAT_METHOD,
        "result": { "type": HEARTBEAT_RESPONSE },
    })
    .to_string()
}

/// Serialized tab notification frame.
///
/// The envelope id identifies the frame in logs only; the relay never
/// registers a pending call against it.
///
/// # Errors
///
/// Returns [`Error::Json`] if the notification fails to serialize.
pub fn tab_update_frame(notification: &TabNotification) -> Result<String> {
    let frame = json!({
        "id": CallId::generate(TAB_UPDATE_METHOD),
        "method": TAB_UPDATE_METHOD,
        "params": serde_json::to_value(notification)?,
    });
    Ok(frame.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_shape() {
        let req = RequestEnvelope::new("chrome_get_cookies", Some(json!({"domain": "a.com"})));
        let value = serde_json::to_value(&req).expect("serialize");

        assert_eq!(value["method"], "chrome_get_cookies");
        assert_eq!(value["params"]["domain"], "a.com");
        assert!(value["id"].as_str().expect("id").starts_with("chrome_get_cookies_"));
    }

    #[test]
    fn test_request_omits_absent_params() {
        let req = RequestEnvelope::new("chrome_get_all_tabs", None);
        let text = serde_json::to_string(&req).expect("serialize");
        assert!(!text.contains("params"));
    }

    #[test]
    fn test_classify_reply_success() {
        let text = r#"{"id":"op_1","method":"op","result":{"ok":true}}"#;
        let msg = WireMessage::classify(text).expect("classify");

        match msg {
            WireMessage::Reply(reply) => {
                assert_eq!(reply.id, CallId::from_wire("op_1"));
                assert!(!reply.is_error());
                let value = reply.into_result().expect("success");
                assert_eq!(value["ok"], true);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_reply_error() {
        let text = r#"{"id":"op_2","method":"op","error":{"code":-32601,"message":"nope"}}"#;
        let msg = WireMessage::classify(text).expect("classify");

        match msg {
            WireMessage::Reply(reply) => {
                assert!(reply.is_error());
                let err = reply.into_result().expect_err("error reply");
                assert!(matches!(err, Error::Peer { code: -32601, .. }));
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_request() {
        let text = r#"{"id":"chrome_get_all_tabs_9","method":"chrome_get_all_tabs"}"#;
        let msg = WireMessage::classify(text).expect("classify");

        match msg {
            WireMessage::Request(req) => {
                assert_eq!(req.method, "chrome_get_all_tabs");
                assert!(req.params.is_none());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_heartbeat_frames() {
        let probe = WireMessage::classify(&heartbeat_probe()).expect("probe");
        assert!(matches!(probe, WireMessage::HeartbeatProbe));

        let ack = WireMessage::classify(&heartbeat_ack()).expect("ack");
        assert!(matches!(ack, WireMessage::HeartbeatAck));

        // Bare legacy form sent by older peers.
        let legacy = WireMessage::classify(r#"{"type":"heartbeat"}"#).expect("legacy");
        assert!(matches!(legacy, WireMessage::HeartbeatProbe));
        let legacy_ack = WireMessage::classify(r#"{"type":"heartbeat_response"}"#).expect("ack");
        assert!(matches!(legacy_ack, WireMessage::HeartbeatAck));
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert!(WireMessage::classify("not json").is_err());
        assert!(WireMessage::classify(r#"{"params":{}}"#).is_err());
    }

    #[test]
    fn test_salvage_id() {
        let text = r#"{"id":"op_7","result":12,"method":5}"#;
        assert!(WireMessage::classify(text).is_err());
        assert_eq!(WireMessage::salvage_id(text), Some(CallId::from_wire("op_7")));
        assert_eq!(WireMessage::salvage_id("not json"), None);
    }

    #[test]
    fn test_failure_envelope_carries_wire_code() {
        let err = Error::missing_argument("selector", "querySelector");
        let reply = ReplyEnvelope::failure(CallId::from_wire("x_1"), "x", &err);

        let wire = reply.error.as_ref().expect("error member");
        assert_eq!(wire.code, -32602);
        assert!(wire.message.contains("selector"));
    }
}
