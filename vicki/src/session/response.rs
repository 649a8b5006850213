//! The per-turn response builder
//!
//! A `Response` belongs to exactly one handler. Its output travels over a
//! `TurnSink` to whoever is waiting on the turn: the dispatcher for a fresh
//! turn, the continuation path for a resumed one.

use crate::error::ResponseError;
use serde_json::Value as JsonValue;
use std::fmt;
use tokio::sync::oneshot;
use vicki_script::{OutputSpeech, PlatformResponse, Request, ResponseEnvelope, SessionId, Speech, SpeechType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Pending,
    Sent,
    AwaitingContinuation,
}

impl fmt::Display for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseState::Pending => f.write_str("pending"),
            ResponseState::Sent => f.write_str("sent"),
            ResponseState::AwaitingContinuation => f.write_str("awaiting continuation"),
        }
    }
}

/// What a handler hands back for its turn.
#[derive(Debug)]
pub enum TurnOutput {
    /// `send` or `raw`: the turn and the session end.
    Final(PlatformResponse),
    /// `send_and_listen`: speak, keep the session open, and resume the
    /// handler through `resolver` when the next request arrives.
    Listen {
        response: PlatformResponse,
        resolver: oneshot::Sender<Resumption>,
    },
}

impl TurnOutput {
    pub fn response(&self) -> &PlatformResponse {
        match self {
            TurnOutput::Final(response) => response,
            TurnOutput::Listen { response, .. } => response,
        }
    }

    pub fn into_response(self) -> PlatformResponse {
        match self {
            TurnOutput::Final(response) => response,
            TurnOutput::Listen { response, .. } => response,
        }
    }
}

/// Follow-up delivered to a suspended handler.
#[derive(Debug)]
pub struct Resumption {
    pub request: Request,
    pub sink: TurnSink,
}

/// Destination of a turn's output.
#[derive(Debug)]
pub enum TurnSink {
    Live(oneshot::Sender<TurnOutput>),
    /// Nobody is waiting (a cancellation after timeout); output is logged and
    /// dropped.
    Detached,
}

impl TurnSink {
    pub fn channel() -> (Self, oneshot::Receiver<TurnOutput>) {
        let (tx, rx) = oneshot::channel();
        (TurnSink::Live(tx), rx)
    }

    fn deliver(self, session_id: &SessionId, output: TurnOutput) -> Result<(), ResponseError> {
        match self {
            TurnSink::Live(tx) => tx.send(output).map_err(|_| ResponseError::TurnClosed),
            TurnSink::Detached => {
                tracing::debug!(
                    session = %session_id,
                    speech = ?output.response().spoken_text(),
                    "dropping output of a detached turn"
                );
                Ok(())
            }
        }
    }
}

pub struct Response {
    session_id: SessionId,
    state: ResponseState,
    speech: Vec<Speech>,
    reprompt: Vec<Speech>,
    max_bytes: usize,
    sink: Option<TurnSink>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("speech", &self.speech)
            .field("reprompt", &self.reprompt)
            .finish()
    }
}

impl Response {
    pub fn new(session_id: SessionId, max_bytes: usize, sink: TurnSink) -> Self {
        Self {
            session_id,
            state: ResponseState::Pending,
            speech: Vec::new(),
            reprompt: Vec::new(),
            max_bytes,
            sink: Some(sink),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn max_speech_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes of speech and reprompt that would be sent right now.
    pub fn payload_bytes(&self) -> usize {
        Self::composed_len(&self.speech) + Self::composed_len(&self.reprompt)
    }

    fn composed_len(parts: &[Speech]) -> usize {
        OutputSpeech::compose(parts).map(|s| s.byte_len()).unwrap_or(0)
    }

    fn ensure_pending(&self, operation: &'static str) -> Result<(), ResponseError> {
        if self.state == ResponseState::Pending {
            Ok(())
        } else {
            Err(ResponseError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn push(&mut self, part: Speech, to_reprompt: bool) -> Result<(), ResponseError> {
        let (mut speech, mut reprompt) = (self.speech.clone(), self.reprompt.clone());
        if to_reprompt {
            reprompt.push(part);
        } else {
            speech.push(part);
        }
        let size = Self::composed_len(&speech) + Self::composed_len(&reprompt);
        if size >= self.max_bytes {
            return Err(ResponseError::PayloadTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        self.speech = speech;
        self.reprompt = reprompt;
        Ok(())
    }

    /// Queue plain text.
    pub fn say(&mut self, content: impl Into<String>) -> Result<&mut Self, ResponseError> {
        self.say_as(content, SpeechType::PlainText)
    }

    pub fn say_ssml(&mut self, content: impl Into<String>) -> Result<&mut Self, ResponseError> {
        self.say_as(content, SpeechType::Ssml)
    }

    pub fn say_as(&mut self, content: impl Into<String>, kind: SpeechType) -> Result<&mut Self, ResponseError> {
        self.ensure_pending("say")?;
        self.push(Speech { content: content.into(), kind }, false)?;
        Ok(self)
    }

    /// Queue what to say if the user stays silent after `send_and_listen`.
    pub fn reprompt(&mut self, content: impl Into<String>) -> Result<&mut Self, ResponseError> {
        self.reprompt_as(content, SpeechType::PlainText)
    }

    pub fn reprompt_as(
        &mut self,
        content: impl Into<String>,
        kind: SpeechType,
    ) -> Result<&mut Self, ResponseError> {
        self.ensure_pending("reprompt")?;
        self.push(Speech { content: content.into(), kind }, true)?;
        Ok(self)
    }

    fn take_envelope(&mut self, should_end_session: bool) -> PlatformResponse {
        let speech = OutputSpeech::compose(&std::mem::take(&mut self.speech));
        let reprompt = OutputSpeech::compose(&std::mem::take(&mut self.reprompt));
        PlatformResponse::Speech(ResponseEnvelope::new(speech, reprompt, should_end_session))
    }

    fn take_sink(&mut self) -> Result<TurnSink, ResponseError> {
        self.sink.take().ok_or(ResponseError::TurnClosed)
    }

    /// Final answer for this turn. Ends the session.
    pub fn send(&mut self) -> Result<(), ResponseError> {
        self.ensure_pending("send")?;
        let response = self.take_envelope(true);
        self.finish(TurnOutput::Final(response))
    }

    /// Fully custom envelope.
    pub fn raw(&mut self, envelope: JsonValue) -> Result<(), ResponseError> {
        self.ensure_pending("raw")?;
        self.speech.clear();
        self.reprompt.clear();
        self.finish(TurnOutput::Final(PlatformResponse::Raw(envelope)))
    }

    fn finish(&mut self, output: TurnOutput) -> Result<(), ResponseError> {
        self.state = ResponseState::Sent;
        let sink = self.take_sink()?;
        sink.deliver(&self.session_id, output)
    }

    /// Speak, keep the session open and wait for the user's reply. On return
    /// the response is pending again and bound to the new turn.
    ///
    /// A user who never answers still produces a request, the cancellation
    /// request. `SessionClosed` means the session went away and nothing can
    /// resume this handler any more.
    pub async fn send_and_listen(&mut self) -> Result<Request, ResponseError> {
        self.ensure_pending("send_and_listen")?;
        let response = self.take_envelope(false);
        let (resolver, resumed) = oneshot::channel();

        self.state = ResponseState::AwaitingContinuation;
        let sink = self.take_sink()?;
        sink.deliver(&self.session_id, TurnOutput::Listen { response, resolver })?;

        let resumption = resumed
            .await
            .map_err(|_| ResponseError::SessionClosed(self.session_id.to_string()))?;

        self.state = ResponseState::Pending;
        self.sink = Some(resumption.sink);
        Ok(resumption.request)
    }
}
