// Error types for the VickiScript language layer

use thiserror::Error;

/// Reasons a metablock is rejected. Each variant names the rule that was broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetablockError {
    #[error("metablock must start with the line `// ==VickiScript==`")]
    MissingStartMarker,

    #[error("line {line}: code found before the metablock; only comments may precede it")]
    CodeBeforeMetablock { line: usize },

    #[error("metablock is not closed with the line `// ==/VickiScript==`")]
    MissingEndMarker,

    #[error("line {line}: metablock lines must be `//` comments")]
    MalformedLine { line: usize },

    #[error("metablock must define @name")]
    MissingName,

    #[error("line {line}: @name may only be defined once")]
    DuplicateName { line: usize },

    #[error("@id '{0}' may only contain [0-9a-z_-.]")]
    InvalidId(String),

    #[error("@version '{0}' is not a non-negative integer")]
    InvalidVersion(String),

    #[error("@icon '{0}' is not an http(s) url")]
    InvalidIcon(String),

    #[error("@permission '{value}' is invalid: {reason}")]
    InvalidPermission { value: String, reason: String },
}

/// Errors raised while normalizing listen conditions.
#[derive(Debug, Clone, Error)]
pub enum ListenError {
    #[error("invalid utterance pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("pass {pass} is outside [0, {max})")]
    PassOutOfRange { pass: usize, max: usize },

    #[error("condition lists cannot be nested")]
    NestedList,

    #[error("structured condition has no utterance pattern")]
    EmptyCondition,
}

/// URL match pattern parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("missing '://' separator")]
    MissingScheme,

    #[error("unsupported scheme '{0}'")]
    InvalidScheme(String),

    #[error("invalid host '{0}'")]
    InvalidHost(String),

    #[error("empty pattern")]
    Empty,
}
