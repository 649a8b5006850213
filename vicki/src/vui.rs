//! Voice UI helpers
//!
//! Multi-turn protocols built on `say` and `send_and_listen`: speaking text
//! longer than one response allows, and asking the user to pick from a list.

use crate::error::{CapabilityError, ResponseError};
use crate::sandbox::ScriptApi;
use crate::session::Response;
use once_cell::sync::Lazy;
use serde_json::json;
use std::collections::HashSet;
use thiserror::Error;
use vicki_script::text::parse_number;
use vicki_script::{BrowserNamespace, Request};

pub const DEFAULT_CONTINUE_PROMPT: &str = "Would you like me to continue?";
pub const DEFAULT_SELECT_PROMPT: &str = "Which one would you like?";

static AFFIRMATIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "yes", "yeah", "yep", "sure", "ok", "okay", "continue", "go", "more", "next", "please",
    ]
    .into_iter()
    .collect()
});

const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

#[derive(Debug, Error)]
pub enum VuiError {
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

#[derive(Debug, Clone, Default)]
pub struct SayLong {
    /// Plain text of any length.
    pub content: String,
    pub prompt: Option<String>,
    pub reprompt: Option<String>,
}

impl SayLong {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

fn is_affirmative(request: &Request) -> bool {
    !request.is_cancel()
        && request
            .utterance()
            .split_whitespace()
            .any(|word| AFFIRMATIVE.contains(word))
}

/// Split `text` into chunks of at most `budget` bytes, on word boundaries
/// where possible.
fn chunk_text(text: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        // A single word over budget is cut at char boundaries.
        while word.len() > budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut cut = budget;
            while !word.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = word.chars().next().map(char::len_utf8).unwrap_or(word.len());
            }
            chunks.push(word[..cut].to_string());
            word = &word[cut..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() { word.len() } else { current.len() + 1 + word.len() };
        if needed > budget {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Speak `content` chunk by chunk, asking after each chunk whether to go on.
/// Ends the turn: the last chunk is sent, and a declined prompt is answered
/// with an empty final response.
pub async fn say_long(response: &mut Response, opts: SayLong) -> Result<(), VuiError> {
    let prompt = opts.prompt.unwrap_or_else(|| DEFAULT_CONTINUE_PROMPT.to_string());
    let reprompt = opts.reprompt.unwrap_or_else(|| prompt.clone());

    // chunk + " " + prompt, plus the reprompt, must stay under the limit.
    // Speech already queued costs a joining space in front of the first chunk,
    // and a queued reprompt one more in front of ours.
    let overhead = prompt.len() + 1 + reprompt.len();
    let queued = response.payload_bytes();
    let separators = if queued > 0 { 2 } else { 0 };
    let limit = response.max_speech_bytes().saturating_sub(queued);
    let budget = limit.saturating_sub(overhead + separators + 1);
    if budget == 0 {
        return Err(ResponseError::PayloadTooLarge {
            size: response.payload_bytes() + overhead,
            limit: response.max_speech_bytes(),
        }
        .into());
    }

    let chunks = chunk_text(&opts.content, budget);
    let last = chunks.len().saturating_sub(1);
    for (index, chunk) in chunks.iter().enumerate() {
        response.say(chunk.as_str())?;
        if index == last {
            break;
        }
        response.say(prompt.as_str())?.reprompt(reprompt.as_str())?;
        let reply = response.send_and_listen().await?;
        if !is_affirmative(&reply) {
            break;
        }
    }
    response.send()?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct Select {
    pub options: Vec<String>,
    pub prompt: Option<String>,
    pub reprompt: Option<String>,
    pub title: Option<String>,
    /// Tab to display the options in. Without one the options are read out.
    pub tab_id: Option<i64>,
}

impl Select {
    pub fn new<S: Into<String>>(options: impl IntoIterator<Item = S>) -> Self {
        Self {
            options: options.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Map a spoken reply to an option index.
pub fn match_option(utterance: &str, options: &[String]) -> Option<usize> {
    let utterance = utterance.trim().to_lowercase();
    let normalized: Vec<String> = options.iter().map(|o| o.trim().to_lowercase()).collect();

    if let Some(index) = normalized.iter().position(|o| *o == utterance) {
        return Some(index);
    }

    let words: Vec<&str> = utterance.split_whitespace().collect();
    if words.contains(&"last") && !options.is_empty() {
        return Some(options.len() - 1);
    }
    if let Some(index) = ORDINALS.iter().position(|o| words.contains(o)) {
        if index < options.len() {
            return Some(index);
        }
    }
    if let Some(n) = parse_number(&utterance) {
        if n.fract() == 0.0 && n >= 1.0 && (n as usize) <= options.len() {
            return Some(n as usize - 1);
        }
    }

    // Longest option mentioned in the reply.
    normalized
        .iter()
        .enumerate()
        .filter(|(_, o)| !o.is_empty() && utterance.contains(o.as_str()))
        .max_by_key(|(_, o)| o.len())
        .map(|(index, _)| index)
}

/// Ask the user to pick one of `opts.options`. Leaves the response pending on
/// the reply's turn; `None` when the user cancels, stays silent or names
/// nothing that matches.
pub async fn select(response: &mut Response, vs: &ScriptApi, opts: Select) -> Result<Option<usize>, VuiError> {
    let prompt = opts.prompt.unwrap_or_else(|| DEFAULT_SELECT_PROMPT.to_string());
    let reprompt = opts.reprompt.unwrap_or_else(|| prompt.clone());

    let displayed = match opts.tab_id {
        Some(tab_id) => {
            vs.browser(
                BrowserNamespace::Tabs,
                "sendMessage",
                json!({
                    "tabId": tab_id,
                    "message": {
                        "type": "vicki.select",
                        "title": opts.title,
                        "options": opts.options
                    }
                }),
            )
            .await?;
            true
        }
        None => false,
    };

    response.say(prompt.as_str())?;
    if !displayed {
        let spoken = opts
            .options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {}.", i + 1, o))
            .collect::<Vec<_>>()
            .join(" ");
        response.say(spoken)?;
    }
    response.reprompt(reprompt.as_str())?;

    let reply = response.send_and_listen().await?;
    if reply.is_cancel() {
        return Ok(None);
    }
    Ok(match_option(reply.utterance(), &opts.options))
}
