//! Inbound requests
//!
//! A `Request` is one conversational turn as delivered by the voice platform.
//! It is immutable; the engine derives a copy with a higher pass number when
//! it re-runs matching.

use crate::listen::MAX_PASSES;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;

pub const CANCEL_UTTERANCE: &str = "cancel";
const CANCEL_INTENTS: &[&str] = &["AMAZON.CancelIntent", "AMAZON.StopIntent"];

/// Conversation identity assigned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Wire shape of a request handed over by the platform boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub utterance: String,
    #[serde(default)]
    pub pass: u8,
    #[serde(default)]
    pub raw: JsonValue,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    utterance: String,
    pass: u8,
    raw: JsonValue,
    session_id: SessionId,
}

impl Request {
    pub fn new(utterance: &str, session_id: impl Into<SessionId>) -> Self {
        Self {
            utterance: normalize_utterance(utterance),
            pass: 0,
            raw: JsonValue::Null,
            session_id: session_id.into(),
        }
    }

    pub fn with_raw(mut self, raw: JsonValue) -> Self {
        self.raw = raw;
        self
    }

    /// Passes beyond the last one are clamped to it.
    pub fn from_envelope(envelope: RequestEnvelope) -> Self {
        let last_pass = (MAX_PASSES - 1) as u8;
        let pass = if envelope.pass > last_pass {
            log::warn!(
                "session {}: pass {} out of range, clamped to {}",
                envelope.session_id,
                envelope.pass,
                last_pass
            );
            last_pass
        } else {
            envelope.pass
        };
        Self {
            utterance: normalize_utterance(&envelope.utterance),
            pass,
            raw: envelope.raw,
            session_id: envelope.session_id,
        }
    }

    pub fn from_json(value: JsonValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value::<RequestEnvelope>(value).map(Self::from_envelope)
    }

    /// The request delivered to a suspended handler when the user never
    /// answered or the session was closed underneath it.
    pub fn cancellation(session_id: SessionId) -> Self {
        Self {
            utterance: CANCEL_UTTERANCE.to_string(),
            pass: 0,
            raw: json!({
                "request": {
                    "type": "IntentRequest",
                    "intent": { "name": "AMAZON.CancelIntent" }
                }
            }),
            session_id,
        }
    }

    /// Same request seen at another pass.
    pub fn at_pass(&self, pass: u8) -> Self {
        Self {
            pass,
            ..self.clone()
        }
    }

    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    pub fn pass(&self) -> u8 {
        self.pass
    }

    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn request_type(&self) -> Option<&str> {
        self.raw.pointer("/request/type").and_then(JsonValue::as_str)
    }

    pub fn intent_name(&self) -> Option<&str> {
        self.raw
            .pointer("/request/intent/name")
            .and_then(JsonValue::as_str)
    }

    pub fn is_cancel(&self) -> bool {
        self.intent_name()
            .map(|name| CANCEL_INTENTS.contains(&name))
            .unwrap_or(false)
            || self.utterance == CANCEL_UTTERANCE
            || self.utterance == "stop"
    }

    pub fn is_session_end(&self) -> bool {
        self.request_type() == Some("SessionEndedRequest")
    }

    pub fn is_launch(&self) -> bool {
        self.request_type() == Some("LaunchRequest")
    }
}

/// Lowercase and trim, collapsing inner runs of whitespace.
pub fn normalize_utterance(utterance: &str) -> String {
    utterance
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let req = Request::new("  Scroll   DOWN ", "s-1");
        assert_eq!(req.utterance(), "scroll down");
        assert_eq!(req.pass(), 0);
        assert_eq!(req.session_id().as_str(), "s-1");
    }

    #[test]
    fn test_empty_utterance_is_allowed() {
        let req = Request::new("", "s-1");
        assert_eq!(req.utterance(), "");
        assert!(!req.is_cancel());
    }

    #[test]
    fn test_from_envelope() {
        let req = Request::from_json(json!({
            "utterance": "Hello World",
            "pass": 1,
            "raw": { "request": { "type": "LaunchRequest" } },
            "sessionId": "abc"
        }))
        .unwrap();
        assert_eq!(req.utterance(), "hello world");
        assert_eq!(req.pass(), 1);
        assert!(req.is_launch());
        assert_eq!(req.session_id(), &SessionId::new("abc"));
    }

    #[test]
    fn test_envelope_pass_is_clamped() {
        let req = Request::from_json(json!({
            "utterance": "hello",
            "pass": 7,
            "sessionId": "abc"
        }))
        .unwrap();
        assert_eq!(req.pass() as usize, MAX_PASSES - 1);

        let req = Request::from_json(json!({ "utterance": "hello", "sessionId": "abc" })).unwrap();
        assert_eq!(req.pass(), 0);
    }

    #[test]
    fn test_inner_whitespace_collapses() {
        let req = Request::from_json(json!({ "utterance": "open\t new   Tab\n", "sessionId": "abc" })).unwrap();
        assert_eq!(req.utterance(), "open new tab");
    }

    #[test]
    fn test_cancellation_request() {
        let req = Request::cancellation(SessionId::new("abc"));
        assert!(req.is_cancel());
        assert_eq!(req.intent_name(), Some("AMAZON.CancelIntent"));
        assert_eq!(req.session_id().as_str(), "abc");
    }

    #[test]
    fn test_session_end() {
        let req = Request::new("", "abc")
            .with_raw(json!({ "request": { "type": "SessionEndedRequest" } }));
        assert!(req.is_session_end());
    }

    #[test]
    fn test_at_pass_keeps_everything_else() {
        let req = Request::new("hello", "abc");
        let second = req.at_pass(2);
        assert_eq!(second.pass(), 2);
        assert_eq!(second.utterance(), "hello");
        assert_eq!(second.session_id(), req.session_id());
    }
}
