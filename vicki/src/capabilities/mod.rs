pub mod browser;
pub mod native;
pub mod proxy;

pub use browser::{BrowserBackend, BrowserCall, Completion, DisconnectedBrowser};
pub use native::{ExecOptions, ExecOutput, NativeBackend, NoNativeCompanion, ProcessNativeBackend};
pub use proxy::{CapabilityProxy, NativeApi, ScopedCapabilities, ScriptGrants};
