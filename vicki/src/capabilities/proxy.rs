//! Capability proxy
//!
//! Every call a script makes to the outside world goes through
//! `CapabilityProxy::invoke`. The grant check always runs before the backend
//! sees the call, so a denied call has no side effect.

use super::browser::{is_content_operation, BrowserBackend, BrowserCall, Completion};
use super::native::{ExecOptions, ExecOutput, NativeBackend};
use crate::error::{CapabilityError, UpstreamError};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use url::Url;
use vicki_script::{BrowserNamespace, PermissionSet};

pub const NATIVE_NAMESPACE: &str = "native";

/// What one script has been granted, as seen by the proxy.
#[derive(Debug, Clone)]
pub struct ScriptGrants {
    script_id: String,
    permissions: PermissionSet,
}

impl ScriptGrants {
    pub fn new(script_id: impl Into<String>, permissions: PermissionSet) -> Self {
        Self {
            script_id: script_id.into(),
            permissions,
        }
    }

    pub fn script_id(&self) -> &str {
        &self.script_id
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    fn denied(&self, capability: impl Into<String>, reason: impl Into<String>) -> CapabilityError {
        let capability = capability.into();
        let reason = reason.into();
        tracing::warn!(script = %self.script_id, %capability, %reason, "capability call denied");
        CapabilityError::PermissionDenied {
            script: self.script_id.clone(),
            capability,
            reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecArgs {
    command: String,
    #[serde(default)]
    options: ExecOptions,
}

#[derive(Debug, Deserialize)]
struct RunJsArgs {
    code: String,
    #[serde(default)]
    params: Vec<JsonValue>,
}

pub struct CapabilityProxy {
    browser: Arc<dyn BrowserBackend>,
    native: Arc<dyn NativeBackend>,
}

impl CapabilityProxy {
    pub fn new(browser: Arc<dyn BrowserBackend>, native: Arc<dyn NativeBackend>) -> Self {
        Self { browser, native }
    }

    /// Dispatch a call by namespace name. `native` routes to the native
    /// surface; everything else must be a known browser namespace.
    pub async fn invoke(
        &self,
        grants: &ScriptGrants,
        namespace: &str,
        operation: &str,
        args: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        if namespace == NATIVE_NAMESPACE {
            return self.invoke_native(grants, operation, args).await;
        }
        let ns = BrowserNamespace::parse(namespace)
            .ok_or_else(|| UpstreamError::UnsupportedNamespace(namespace.to_string()))?;
        self.browser_call(grants, ns, operation, args).await
    }

    pub async fn browser_call(
        &self,
        grants: &ScriptGrants,
        namespace: BrowserNamespace,
        operation: &str,
        mut args: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        let capability = format!("{}.{}", namespace, operation);

        if is_content_operation(namespace, operation) {
            let (tab_id, url) = self.resolve_target_tab(&args).await?;
            let allowed = url
                .as_ref()
                .map(|u| grants.permissions.allows_url(u))
                .unwrap_or(false);
            if !allowed {
                let target = url.map(|u| u.to_string()).unwrap_or_else(|| "an unknown url".to_string());
                return Err(grants.denied(capability, format!("no match pattern covers {}", target)));
            }
            // Pin the call to the tab that was checked.
            if args.is_null() {
                args = json!({});
            }
            if let Some(obj) = args.as_object_mut() {
                obj.insert("tabId".to_string(), json!(tab_id));
            }
        } else if !grants.permissions.allows_namespace(namespace) {
            return Err(grants.denied(capability, format!("missing permission browser.{}", namespace)));
        }

        tracing::debug!(script = %grants.script_id, %capability, "browser call");
        self.call_backend(BrowserCall::new(namespace, operation, args)).await
    }

    async fn call_backend(&self, call: BrowserCall) -> Result<JsonValue, CapabilityError> {
        let (completion, pending) = Completion::channel();
        self.browser.call(call, completion);
        Ok(pending.wait().await?)
    }

    /// Tab a content operation targets: the `tabId` argument when given,
    /// otherwise the active tab of the current window.
    async fn resolve_target_tab(&self, args: &JsonValue) -> Result<(i64, Option<Url>), CapabilityError> {
        let tab = match args.get("tabId").and_then(JsonValue::as_i64) {
            Some(tab_id) => {
                self.call_backend(BrowserCall::new(
                    BrowserNamespace::Tabs,
                    "get",
                    json!({ "tabId": tab_id }),
                ))
                .await?
            }
            None => {
                let tabs = self
                    .call_backend(BrowserCall::new(
                        BrowserNamespace::Tabs,
                        "query",
                        json!({ "active": true, "currentWindow": true }),
                    ))
                    .await?;
                tabs.get(0)
                    .cloned()
                    .ok_or_else(|| UpstreamError::Browser("no active tab".to_string()))?
            }
        };
        let tab_id = tab
            .get("id")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| UpstreamError::Browser("tab without an id".to_string()))?;
        let url = tab
            .get("url")
            .and_then(JsonValue::as_str)
            .and_then(|u| Url::parse(u).ok());
        Ok((tab_id, url))
    }

    async fn invoke_native(
        &self,
        grants: &ScriptGrants,
        operation: &str,
        args: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        match operation {
            "available" => Ok(json!(self.native_available(grants).await)),
            "os" => Ok(json!(self.native_os(grants)?)),
            "exec" => {
                let args: ExecArgs = serde_json::from_value(args)
                    .map_err(|e| UpstreamError::InvalidArguments(e.to_string()))?;
                let output = self.exec(grants, &args.command, &args.options).await?;
                serde_json::to_value(output)
                    .map_err(|e| UpstreamError::InvalidArguments(e.to_string()).into())
            }
            "runJs" => {
                let args: RunJsArgs = serde_json::from_value(args)
                    .map_err(|e| UpstreamError::InvalidArguments(e.to_string()))?;
                self.run_js(grants, &args.code, &args.params).await
            }
            other => Err(UpstreamError::InvalidArguments(format!("unknown native operation '{}'", other)).into()),
        }
    }

    fn check_native(&self, grants: &ScriptGrants, capability: &str) -> Result<(), CapabilityError> {
        if grants.permissions.allows_native() {
            Ok(())
        } else {
            Err(grants.denied(capability, "missing permission native"))
        }
    }

    /// Grant held and companion usable. Never fails.
    pub async fn native_available(&self, grants: &ScriptGrants) -> bool {
        grants.permissions.allows_native() && self.native.available().await
    }

    pub fn native_os(&self, grants: &ScriptGrants) -> Result<String, CapabilityError> {
        self.check_native(grants, "native.os")?;
        Ok(self.native.os())
    }

    pub async fn exec(
        &self,
        grants: &ScriptGrants,
        command: &str,
        options: &ExecOptions,
    ) -> Result<ExecOutput, CapabilityError> {
        self.check_native(grants, "native.exec")?;
        if !self.native.available().await {
            return Err(UpstreamError::NativeUnavailable.into());
        }
        tracing::debug!(script = %grants.script_id, %command, "native exec");
        let output = self.native.exec(command, options).await?;
        if output.exit_code != 0 && options.fail_on_non_zero_exit_code {
            return Err(UpstreamError::NonZeroExit {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(output)
    }

    pub async fn run_js(
        &self,
        grants: &ScriptGrants,
        code: &str,
        params: &[JsonValue],
    ) -> Result<JsonValue, CapabilityError> {
        self.check_native(grants, "native.runJs")?;
        if !self.native.available().await {
            return Err(UpstreamError::NativeUnavailable.into());
        }
        Ok(self.native.run_js(code, params).await?)
    }
}

/// The proxy bound to one script's grants. This is the only capability
/// surface a sandbox hands to its handlers.
#[derive(Clone)]
pub struct ScopedCapabilities {
    proxy: Arc<CapabilityProxy>,
    grants: Arc<ScriptGrants>,
}

impl ScopedCapabilities {
    pub fn new(proxy: Arc<CapabilityProxy>, grants: ScriptGrants) -> Self {
        Self {
            proxy,
            grants: Arc::new(grants),
        }
    }

    pub fn script_id(&self) -> &str {
        self.grants.script_id()
    }

    pub async fn invoke(
        &self,
        namespace: &str,
        operation: &str,
        args: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        self.proxy.invoke(&self.grants, namespace, operation, args).await
    }

    pub async fn browser(
        &self,
        namespace: BrowserNamespace,
        operation: &str,
        args: JsonValue,
    ) -> Result<JsonValue, CapabilityError> {
        self.proxy.browser_call(&self.grants, namespace, operation, args).await
    }

    pub fn native(&self) -> NativeApi<'_> {
        NativeApi { scoped: self }
    }
}

pub struct NativeApi<'a> {
    scoped: &'a ScopedCapabilities,
}

impl NativeApi<'_> {
    pub async fn available(&self) -> bool {
        self.scoped.proxy.native_available(&self.scoped.grants).await
    }

    pub fn os(&self) -> Result<String, CapabilityError> {
        self.scoped.proxy.native_os(&self.scoped.grants)
    }

    pub async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecOutput, CapabilityError> {
        self.scoped.proxy.exec(&self.scoped.grants, command, &options).await
    }

    pub async fn run_js(&self, code: &str, params: Vec<JsonValue>) -> Result<JsonValue, CapabilityError> {
        self.scoped.proxy.run_js(&self.scoped.grants, code, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::native::NoNativeCompanion;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vicki_script::PermissionSpec;

    /// Records calls and serves one fixed tab.
    #[derive(Default)]
    struct RecordingBrowser {
        calls: Mutex<Vec<String>>,
    }

    impl BrowserBackend for RecordingBrowser {
        fn call(&self, call: BrowserCall, completion: Completion) {
            self.calls.lock().unwrap().push(call.qualified_name());
            match call.operation.as_str() {
                "query" => completion.succeed(json!([{ "id": 7, "url": "https://www.amazon.com/dp/1" }])),
                "get" => completion.succeed(json!({ "id": 9, "url": "https://example.org/" })),
                _ => completion.succeed(json!({ "ok": true })),
            }
        }
    }

    struct FakeNative {
        exit_code: i32,
    }

    #[async_trait]
    impl NativeBackend for FakeNative {
        async fn available(&self) -> bool {
            true
        }

        async fn exec(&self, _command: &str, _options: &ExecOptions) -> Result<ExecOutput, UpstreamError> {
            Ok(ExecOutput {
                exit_code: self.exit_code,
                stdout: String::new(),
                stderr: "boom".to_string(),
            })
        }

        async fn run_js(&self, _code: &str, params: &[JsonValue]) -> Result<JsonValue, UpstreamError> {
            Ok(json!(params))
        }
    }

    fn grants(perms: &[&str]) -> ScriptGrants {
        let specs: Vec<PermissionSpec> = perms.iter().map(|p| p.parse().unwrap()).collect();
        ScriptGrants::new("test", PermissionSet::from_specs(&specs))
    }

    fn proxy(browser: Arc<RecordingBrowser>, native: Arc<dyn NativeBackend>) -> CapabilityProxy {
        CapabilityProxy::new(browser, native)
    }

    #[tokio::test]
    async fn test_denied_call_has_no_side_effect() {
        let browser = Arc::new(RecordingBrowser::default());
        let proxy = proxy(browser.clone(), Arc::new(NoNativeCompanion));
        let err = proxy
            .invoke(&grants(&[]), "bookmarks", "create", json!({ "title": "x" }))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(browser.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tabs_and_windows_are_implicit() {
        let browser = Arc::new(RecordingBrowser::default());
        let proxy = proxy(browser.clone(), Arc::new(NoNativeCompanion));
        proxy.invoke(&grants(&[]), "tabs", "create", json!({})).await.unwrap();
        proxy.invoke(&grants(&[]), "windows", "getAll", json!({})).await.unwrap();
        assert_eq!(*browser.calls.lock().unwrap(), vec!["tabs.create", "windows.getAll"]);
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let proxy = proxy(Arc::new(RecordingBrowser::default()), Arc::new(NoNativeCompanion));
        let err = proxy.invoke(&grants(&[]), "cookies", "getAll", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            CapabilityError::Upstream(UpstreamError::UnsupportedNamespace("cookies".to_string()))
        );
    }

    #[tokio::test]
    async fn test_content_operation_needs_url_grant() {
        let browser = Arc::new(RecordingBrowser::default());
        let proxy = proxy(browser.clone(), Arc::new(NoNativeCompanion));

        let err = proxy
            .invoke(&grants(&[]), "tabs", "executeScript", json!({ "code": "1" }))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(*browser.calls.lock().unwrap(), vec!["tabs.query"]);

        let ok = grants(&["*://*.amazon.com/*"]);
        proxy.invoke(&ok, "tabs", "executeScript", json!({ "code": "1" })).await.unwrap();

        // Explicit tab on another site is still refused.
        let err = proxy
            .invoke(&ok, "tabs", "insertCSS", json!({ "tabId": 9, "css": "a{}" }))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());

        proxy
            .invoke(&grants(&["<all_urls>"]), "tabs", "sendMessage", json!({ "tabId": 9 }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_native_checks_order() {
        let browser = Arc::new(RecordingBrowser::default());

        let unavailable = proxy(browser.clone(), Arc::new(NoNativeCompanion));
        let err = unavailable.exec(&grants(&[]), "ls", &ExecOptions::default()).await.unwrap_err();
        assert!(err.is_permission_denied());
        let err = unavailable.exec(&grants(&["native"]), "ls", &ExecOptions::default()).await.unwrap_err();
        assert_eq!(err, CapabilityError::Upstream(UpstreamError::NativeUnavailable));
        assert!(!unavailable.native_available(&grants(&["native"])).await);
    }

    #[tokio::test]
    async fn test_exec_exit_code_policy() {
        let proxy = proxy(Arc::new(RecordingBrowser::default()), Arc::new(FakeNative { exit_code: 1 }));
        let g = grants(&["native"]);

        let err = proxy.exec(&g, "false", &ExecOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Upstream(UpstreamError::NonZeroExit { exit_code: 1, .. })
        ));

        let out = proxy
            .invoke(
                &g,
                "native",
                "exec",
                json!({ "command": "false", "options": { "failOnNonZeroExitCode": false } }),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({ "exitCode": 1, "stdout": "", "stderr": "boom" }));
    }

    #[tokio::test]
    async fn test_run_js_through_invoke() {
        let proxy = proxy(Arc::new(RecordingBrowser::default()), Arc::new(FakeNative { exit_code: 0 }));
        let out = proxy
            .invoke(&grants(&["native"]), "native", "runJs", json!({ "code": "(a) => a", "params": [1] }))
            .await
            .unwrap();
        assert_eq!(out, json!([1]));
    }
}
