//! Vicki runtime host
//!
//! Loads VickiScripts into isolated sandboxes, routes each voice request to
//! the first script that claims it, proxies their capability calls through
//! permission checks, and keeps a handler suspended across the conversational
//! round trip of `send_and_listen`.

pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod registry;
pub mod sandbox;
pub mod session;
pub mod utils;
pub mod vui;

pub use capabilities::{
    BrowserBackend, BrowserCall, CapabilityProxy, Completion, ExecOptions, ExecOutput,
    NativeBackend, ScopedCapabilities,
};
pub use config::VickiConfig;
pub use dispatch::{DispatchOutcome, Engine, EngineBuilder, Route};
pub use error::{CapabilityError, HandlerError, ResponseError, UpstreamError, VickiError, VickiResult};
pub use registry::Script;
pub use sandbox::{HandlerContext, Listener, ScriptApi, ScriptProgram, ScriptSource};
pub use session::{Response, ResponseState};

pub use vicki_script;
