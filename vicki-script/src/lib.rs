//! VickiScript language layer
//!
//! Everything about a script that can be decided without running it: the
//! metablock, declared permissions, listen conditions and how they match a
//! request, plus the speech envelope sent back to the voice platform.

pub mod error;
pub mod listen;
pub mod metablock;
pub mod permission;
pub mod request;
pub mod speech;
pub mod text;

pub use error::{ListenError, MetablockError, PatternError};
pub use listen::{
    CompiledCondition, HandlerMatch, ListenCondition, PassFilter, Pattern, Precondition,
    RegexMatch, StructuredCondition, MAX_PASSES,
};
pub use metablock::{parse_metablock, Metablock};
pub use permission::{BrowserNamespace, MatchPattern, PermissionSet, PermissionSpec};
pub use request::{Request, RequestEnvelope, SessionId};
pub use speech::{OutputSpeech, PlatformResponse, ResponseEnvelope, Speech, SpeechType};
