pub mod api;
pub mod host;
pub mod listener;

pub use api::ScriptApi;
pub use host::{HandlerRun, SandboxHandle, SandboxHost, SandboxStatus};
pub use listener::{HandlerContext, HandlerFn, Listener, ScriptProgram, ScriptSource};
