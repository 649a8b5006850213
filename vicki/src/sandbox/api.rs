// The `$vs` surface: everything a handler can reach

use crate::capabilities::{NativeApi, ScopedCapabilities};
use crate::error::CapabilityError;
use crate::logging::Console;
use serde_json::Value as JsonValue;
use vicki_script::BrowserNamespace;

#[derive(Clone)]
pub struct ScriptApi {
    capabilities: ScopedCapabilities,
    console: Console,
}

impl ScriptApi {
    pub fn new(capabilities: ScopedCapabilities, console: Console) -> Self {
        Self { capabilities, console }
    }

    pub fn script_id(&self) -> &str {
        self.capabilities.script_id()
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn capabilities(&self) -> &ScopedCapabilities {
        &self.capabilities
    }

    /// `browser.<namespace>.<operation>(args)`
    pub async fn browser(
        &self,
        namespace: BrowserNamespace,
        operation: &str,
        args: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        self.capabilities.browser(namespace, operation, args).await
    }

    pub fn native(&self) -> NativeApi<'_> {
        self.capabilities.native()
    }
}
