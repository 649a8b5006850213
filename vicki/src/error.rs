// Error taxonomy of the Vicki runtime

use std::time::Duration;
use thiserror::Error;
use vicki_script::{ListenError, MetablockError};

pub type VickiResult<T> = Result<T, VickiError>;

/// Registry and engine level failures. None of these are fatal to the engine;
/// at worst the offending script does not participate.
#[derive(Debug, Error)]
pub enum VickiError {
    #[error(transparent)]
    Metablock(#[from] MetablockError),

    #[error("script '{script}' registered an invalid listen condition: {source}")]
    Listen {
        script: String,
        #[source]
        source: ListenError,
    },

    #[error("script '{script}' failed to install: {message}")]
    Install { script: String, message: String },

    #[error("script '{0}' is already registered")]
    DuplicateScript(String),

    #[error("rank {0} is already taken")]
    DuplicateRank(u32),

    #[error("no rank left after {0}")]
    RankExhausted(u32),

    #[error("script '{0}' is not registered")]
    UnknownScript(String),

    #[error("version {new} of '{id}' is not newer than the installed version {installed}")]
    VersionNotNewer { id: String, installed: u32, new: u32 },

    #[error("sandbox for '{0}' is not running")]
    SandboxClosed(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Why a capability call failed upstream of the permission check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("native companion is not available")]
    NativeUnavailable,

    #[error("command exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("browser call failed: {0}")]
    Browser(String),

    #[error("browser call never completed")]
    NoCompletion,

    #[error("unsupported namespace '{0}'")]
    UnsupportedNamespace(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("failed to start process: {0}")]
    Spawn(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("javascript failed: {0}")]
    RunJs(String),
}

/// Failure of a call made through the capability proxy. Always recoverable by
/// the calling script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("permission denied for script '{script}' calling {capability}: {reason}")]
    PermissionDenied {
        script: String,
        capability: String,
        reason: String,
    },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl CapabilityError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CapabilityError::PermissionDenied { .. })
    }
}

/// Misuse of a `Response` or a turn that went away underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("{operation} is not allowed while the response is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("speech payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("the turn this response belongs to is no longer listening")]
    TurnClosed,

    #[error("session {0} was closed")]
    SessionClosed(String),
}

/// A handler that failed to settle cleanly. Reported per script; the current
/// pass continues with the next candidate.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("handler of '{script}' failed: {message}")]
    Failed { script: String, message: String },

    #[error("handler of '{script}' panicked: {message}")]
    Panicked { script: String, message: String },

    #[error("handler of '{script}' did not settle within {after:?}")]
    Timeout { script: String, after: Duration },
}
