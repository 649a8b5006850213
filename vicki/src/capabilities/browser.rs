//! Browser backend boundary
//!
//! The real extension APIs live outside this crate. A backend receives one
//! `BrowserCall` and reports the outcome exactly once through its
//! `Completion`, mirroring the callback style of extension APIs.

use crate::error::UpstreamError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use vicki_script::BrowserNamespace;

/// Operations that touch page content and therefore need a URL grant.
pub const CONTENT_OPERATIONS: &[&str] = &["executeScript", "insertCSS", "removeCSS", "sendMessage"];

pub fn is_content_operation(namespace: BrowserNamespace, operation: &str) -> bool {
    namespace == BrowserNamespace::Tabs && CONTENT_OPERATIONS.contains(&operation)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserCall {
    pub namespace: BrowserNamespace,
    pub operation: String,
    pub args: JsonValue,
}

impl BrowserCall {
    pub fn new(namespace: BrowserNamespace, operation: impl Into<String>, args: JsonValue) -> Self {
        Self {
            namespace,
            operation: operation.into(),
            args,
        }
    }

    /// `namespace.operation`, as used in logs and permission errors.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.operation)
    }
}

/// One-shot completion of a browser call. Dropping it without calling
/// `succeed` or `fail` is reported to the caller as `NoCompletion`.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<JsonValue, String>>,
}

impl Completion {
    pub fn channel() -> (Self, PendingCall) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, PendingCall { rx })
    }

    pub fn succeed(self, value: JsonValue) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

/// Awaitable side of a `Completion`.
#[derive(Debug)]
pub struct PendingCall {
    rx: oneshot::Receiver<Result<JsonValue, String>>,
}

impl PendingCall {
    pub async fn wait(self) -> Result<JsonValue, UpstreamError> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(UpstreamError::Browser(reason)),
            Err(_) => Err(UpstreamError::NoCompletion),
        }
    }
}

pub trait BrowserBackend: Send + Sync {
    fn call(&self, call: BrowserCall, completion: Completion);
}

/// Backend used when no browser is attached. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedBrowser;

impl BrowserBackend for DisconnectedBrowser {
    fn call(&self, call: BrowserCall, completion: Completion) {
        completion.fail(format!("no browser attached for {}", call.qualified_name()));
    }
}
