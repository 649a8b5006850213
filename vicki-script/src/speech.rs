// Outbound speech and the platform response envelope

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Platform payload limit on spoken content, in bytes.
pub const DEFAULT_MAX_SPEECH_BYTES: usize = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpeechType {
    #[default]
    PlainText,
    #[serde(rename = "SSML")]
    Ssml,
}

impl FromStr for SpeechType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PlainText" => Ok(SpeechType::PlainText),
            "SSML" => Ok(SpeechType::Ssml),
            other => Err(format!("unsupported speech type '{}'", other)),
        }
    }
}

impl fmt::Display for SpeechType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechType::PlainText => f.write_str("PlainText"),
            SpeechType::Ssml => f.write_str("SSML"),
        }
    }
}

/// One `say` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speech {
    pub content: String,
    pub kind: SpeechType,
}

impl Speech {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: SpeechType::PlainText,
        }
    }

    pub fn ssml(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: SpeechType::Ssml,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputSpeech {
    PlainText { text: String },
    #[serde(rename = "SSML")]
    Ssml { ssml: String },
}

impl OutputSpeech {
    pub fn byte_len(&self) -> usize {
        match self {
            OutputSpeech::PlainText { text } => text.len(),
            OutputSpeech::Ssml { ssml } => ssml.len(),
        }
    }

    /// Merge ordered speech parts into one output. Plain parts join with a
    /// space; any SSML part turns the whole output into one `<speak>` document.
    pub fn compose(parts: &[Speech]) -> Option<OutputSpeech> {
        if parts.is_empty() {
            return None;
        }
        if parts.iter().all(|p| p.kind == SpeechType::PlainText) {
            return Some(OutputSpeech::PlainText {
                text: parts.iter().map(|p| p.content.trim()).join(" "),
            });
        }
        let body = parts
            .iter()
            .map(|p| match p.kind {
                SpeechType::PlainText => escape_xml(p.content.trim()),
                SpeechType::Ssml => strip_speak(p.content.trim()).to_string(),
            })
            .join(" ");
        Some(OutputSpeech::Ssml {
            ssml: format!("<speak>{}</speak>", body),
        })
    }
}

fn strip_speak(ssml: &str) -> &str {
    ssml.strip_prefix("<speak>")
        .and_then(|s| s.strip_suffix("</speak>"))
        .map(str::trim)
        .unwrap_or(ssml)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reprompt {
    pub output_speech: OutputSpeech,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_speech: Option<OutputSpeech>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprompt: Option<Reprompt>,
    pub should_end_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub version: String,
    pub response: ResponseBody,
}

impl ResponseEnvelope {
    pub fn new(
        output_speech: Option<OutputSpeech>,
        reprompt: Option<OutputSpeech>,
        should_end_session: bool,
    ) -> Self {
        Self {
            version: "1.0".to_string(),
            response: ResponseBody {
                output_speech,
                reprompt: reprompt.map(|output_speech| Reprompt { output_speech }),
                should_end_session,
            },
        }
    }
}

/// What is handed back to the platform for a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformResponse {
    Speech(ResponseEnvelope),
    /// Fully custom envelope supplied by the script.
    Raw(JsonValue),
}

impl PlatformResponse {
    pub fn to_json(&self) -> JsonValue {
        match self {
            PlatformResponse::Speech(envelope) => {
                serde_json::to_value(envelope).unwrap_or(JsonValue::Null)
            }
            PlatformResponse::Raw(value) => value.clone(),
        }
    }

    pub fn output_speech(&self) -> Option<&OutputSpeech> {
        match self {
            PlatformResponse::Speech(envelope) => envelope.response.output_speech.as_ref(),
            PlatformResponse::Raw(_) => None,
        }
    }

    /// Plain text or SSML body of the spoken output, for logs and tests.
    pub fn spoken_text(&self) -> Option<&str> {
        self.output_speech().map(|s| match s {
            OutputSpeech::PlainText { text } => text.as_str(),
            OutputSpeech::Ssml { ssml } => ssml.as_str(),
        })
    }
}
