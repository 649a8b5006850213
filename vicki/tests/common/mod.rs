//! Shared fixtures for engine-level tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vicki::capabilities::{BrowserBackend, BrowserCall, Completion, NativeBackend};
use vicki::config::VickiConfig;
use vicki::error::UpstreamError;
use vicki::{DispatchOutcome, Engine, ExecOptions, ExecOutput};

/// Browser that records every call and answers with canned values.
#[derive(Default)]
pub struct FakeBrowser {
    pub calls: Mutex<Vec<(String, JsonValue)>>,
}

impl FakeBrowser {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn args_of(&self, qualified: &str) -> Option<JsonValue> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == qualified)
            .map(|(_, args)| args.clone())
    }
}

impl BrowserBackend for FakeBrowser {
    fn call(&self, call: BrowserCall, completion: Completion) {
        let name = call.qualified_name();
        self.calls.lock().unwrap().push((name.clone(), call.args.clone()));
        match name.as_str() {
            "windows.getLastFocused" => completion.succeed(json!({ "id": 1, "focused": true })),
            "tabs.query" => completion.succeed(json!([
                { "id": 7, "windowId": 1, "url": "https://www.amazon.com/dp/1", "title": "Item", "active": true }
            ])),
            _ => completion.succeed(json!({ "ok": true })),
        }
    }
}

/// Companion that pretends every command exits with `exit_code`.
pub struct FakeNative {
    pub exit_code: i32,
    pub execs: AtomicUsize,
}

impl FakeNative {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            execs: AtomicUsize::new(0),
        }
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NativeBackend for FakeNative {
    async fn available(&self) -> bool {
        true
    }

    async fn exec(&self, command: &str, _options: &ExecOptions) -> Result<ExecOutput, UpstreamError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        Ok(ExecOutput {
            exit_code: self.exit_code,
            stdout: format!("ran {}", command),
            stderr: if self.exit_code == 0 { String::new() } else { "failed".to_string() },
        })
    }

    async fn run_js(&self, _code: &str, params: &[JsonValue]) -> Result<JsonValue, UpstreamError> {
        Ok(json!(params))
    }
}

pub fn test_config() -> VickiConfig {
    let mut config = VickiConfig::default();
    config.dispatch.handler_timeout_ms = 500;
    config.session.continuation_timeout_ms = 2_000;
    config.native.enabled = false;
    config
}

pub fn engine() -> Engine {
    Engine::builder().config(test_config()).build()
}

pub fn engine_with(browser: Arc<FakeBrowser>, native: Arc<dyn NativeBackend>) -> Engine {
    Engine::builder()
        .config(test_config())
        .browser(browser)
        .native(native)
        .build()
}

/// Metablock source with `@name` plus any extra `key value` lines.
pub fn metablock(name: &str, extra: &[&str]) -> String {
    let mut source = String::from("// ==VickiScript==\n");
    source.push_str(&format!("// @name {}\n", name));
    for line in extra {
        source.push_str(&format!("// @{}\n", line));
    }
    source.push_str("// ==/VickiScript==\n");
    source
}

pub fn spoken(outcome: &DispatchOutcome) -> Option<String> {
    outcome
        .response()
        .and_then(|r| r.spoken_text())
        .map(str::to_string)
}

pub fn should_end_session(outcome: &DispatchOutcome) -> Option<bool> {
    outcome
        .response()
        .and_then(|r| r.to_json()["response"]["shouldEndSession"].as_bool())
}
