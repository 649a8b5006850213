//! Dispatch engine
//!
//! `Engine::handle` is the platform entry point. A request for a session with
//! a suspended handler goes straight back to that handler; anything else is
//! dispatched. Dispatch scans up to `MAX_PASSES` passes; within a pass scripts
//! are tried strictly by ascending rank and one at a time, and the first
//! handler that sends or listens owns the turn.

use crate::capabilities::{
    BrowserBackend, CapabilityProxy, DisconnectedBrowser, NativeBackend, NoNativeCompanion,
    ProcessNativeBackend,
};
use crate::config::VickiConfig;
use crate::error::{HandlerError, VickiError, VickiResult};
use crate::registry::{RegisteredScript, Script, ScriptRegistry};
use crate::sandbox::{HandlerRun, SandboxStatus, ScriptSource};
use crate::session::{Response, SessionInfo, SessionManager, TurnOutput, TurnSink};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tokio::task::AbortHandle;
use vicki_script::{HandlerMatch, PlatformResponse, Precondition, Request, SessionId, MAX_PASSES};

/// How the winning handler got the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dispatch { pass: u8 },
    Continuation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Handled {
        script_id: String,
        route: Route,
        response: PlatformResponse,
    },
    /// Nobody claimed the turn; the platform supplies its own fallback.
    Unhandled,
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchOutcome::Handled { .. })
    }

    pub fn script_id(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Handled { script_id, .. } => Some(script_id),
            DispatchOutcome::Unhandled => None,
        }
    }

    pub fn response(&self) -> Option<&PlatformResponse> {
        match self {
            DispatchOutcome::Handled { response, .. } => Some(response),
            DispatchOutcome::Unhandled => None,
        }
    }
}

pub struct EngineBuilder {
    config: VickiConfig,
    browser: Option<Arc<dyn BrowserBackend>>,
    native: Option<Arc<dyn NativeBackend>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: VickiConfig) -> Self {
        self.config = config;
        self
    }

    pub fn browser(mut self, browser: Arc<dyn BrowserBackend>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn native(mut self, native: Arc<dyn NativeBackend>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn build(self) -> Engine {
        let browser = self.browser.unwrap_or_else(|| Arc::new(DisconnectedBrowser));
        let native: Arc<dyn NativeBackend> = match self.native {
            Some(native) => native,
            None if self.config.native.enabled => {
                Arc::new(ProcessNativeBackend::new(self.config.native.clone()))
            }
            None => Arc::new(NoNativeCompanion),
        };
        let proxy = Arc::new(CapabilityProxy::new(browser, native));
        Engine {
            registry: ScriptRegistry::new(proxy, self.config.sandbox.mailbox_capacity),
            sessions: SessionManager::new(self.config.session.continuation_timeout()),
            preconditions: RwLock::new(Vec::new()),
            config: self.config,
        }
    }
}

pub struct Engine {
    registry: ScriptRegistry,
    sessions: SessionManager,
    preconditions: RwLock<Vec<Precondition>>,
    config: VickiConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: VickiConfig::default(),
            browser: None,
            native: None,
        }
    }

    pub fn config(&self) -> &VickiConfig {
        &self.config
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub async fn load(&self, source: ScriptSource) -> VickiResult<Arc<Script>> {
        self.registry.register(source).await
    }

    pub async fn load_with_rank(&self, source: ScriptSource, rank: u32) -> VickiResult<Arc<Script>> {
        self.registry.register_with_rank(source, rank).await
    }

    /// Install a newer version of a loaded script. Continuations owned by
    /// the old version are dropped.
    pub async fn update(&self, source: ScriptSource) -> VickiResult<Arc<Script>> {
        let script = self.registry.replace(source).await?;
        self.sessions.release_owned_by(script.id());
        Ok(script)
    }

    pub async fn unregister(&self, script_id: &str) -> VickiResult<Arc<Script>> {
        let script = self.registry.unregister(script_id).await?;
        let released = self.sessions.release_owned_by(script_id);
        if released > 0 {
            tracing::info!(script = %script_id, released, "released sessions of unregistered script");
        }
        Ok(script)
    }

    pub async fn scripts(&self) -> Vec<Arc<Script>> {
        self.registry.all().await
    }

    /// Engine-wide precondition, checked before any script is consulted.
    pub async fn add_precondition(&self, predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) {
        self.preconditions.write().await.push(Precondition::new(predicate));
    }

    /// Drop every script, session and engine-wide precondition.
    pub async fn reset(&self) {
        self.preconditions.write().await.clear();
        self.sessions.clear();
        self.registry.clear().await;
        tracing::info!("engine reset");
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list()
    }

    /// Close a session. A suspended handler is resumed with the cancellation
    /// request and can no longer answer the platform.
    pub fn end_session(&self, session_id: &SessionId) -> bool {
        self.sessions.release(session_id)
    }

    pub async fn status(&self, script_id: &str) -> VickiResult<SandboxStatus> {
        self.entry(script_id).await?.sandbox.status().await
    }

    async fn entry(&self, script_id: &str) -> VickiResult<RegisteredScript> {
        self.registry
            .get(script_id)
            .await
            .ok_or_else(|| VickiError::UnknownScript(script_id.to_string()))
    }

    /// Which handler of `script_id` would receive the request.
    pub async fn find_handler(&self, script_id: &str, request: &Request) -> VickiResult<Option<HandlerMatch>> {
        self.entry(script_id).await?.sandbox.find_handler(request).await
    }

    /// Run one script's matching handler directly, bypassing rank and pass
    /// order.
    pub async fn invoke(&self, script_id: &str, request: &Request) -> VickiResult<DispatchOutcome> {
        let entry = self.entry(script_id).await?;
        let Some(matched) = entry.sandbox.find_handler(request).await? else {
            return Ok(DispatchOutcome::Unhandled);
        };
        let route = Route::Dispatch { pass: request.pass() };
        Ok(self
            .run_candidate(&entry, request, matched, route)
            .await
            .unwrap_or(DispatchOutcome::Unhandled))
    }

    /// Platform entry point.
    pub async fn handle(&self, request: Request) -> VickiResult<DispatchOutcome> {
        let session_id = request.session_id().clone();

        if request.is_session_end() {
            if self.end_session(&session_id) {
                tracing::info!(session = %session_id, "session ended by platform");
            }
            return Ok(DispatchOutcome::Unhandled);
        }

        if let Some(session) = self.sessions.take(&session_id) {
            let owner = session.owner().to_string();
            let (sink, output) = TurnSink::channel();
            match session.resume(request.clone(), sink) {
                Ok(resumed) => {
                    tracing::debug!(session = %session_id, script = %owner, "resuming continuation");
                    let outcome = self
                        .await_turn(&owner, &session_id, output, resumed.handle(), Route::Continuation)
                        .await;
                    return Ok(outcome.unwrap_or(DispatchOutcome::Unhandled));
                }
                Err(_) => {
                    tracing::debug!(session = %session_id, script = %owner, "continuation owner is gone, dispatching");
                }
            }
        }

        self.dispatch(request).await
    }

    /// Multi-pass scan from the request's pass up to `MAX_PASSES`.
    pub async fn dispatch(&self, request: Request) -> VickiResult<DispatchOutcome> {
        let candidates = self.registry.candidates().await;
        let globals = self.preconditions.read().await.clone();

        for pass in request.pass()..MAX_PASSES as u8 {
            let request = request.at_pass(pass);
            if !globals.iter().all(|p| p.check(&request)) {
                tracing::debug!(pass, "engine precondition rejected request");
                continue;
            }
            for entry in &candidates {
                let matched = match entry.sandbox.find_handler(&request).await {
                    Ok(Some(matched)) => matched,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(script = %entry.script.id(), error = %e, "skipping script");
                        continue;
                    }
                };
                let route = Route::Dispatch { pass };
                if let Some(outcome) = self.run_candidate(entry, &request, matched, route).await {
                    return Ok(outcome);
                }
            }
        }

        tracing::debug!(utterance = %request.utterance(), "request unhandled");
        Ok(DispatchOutcome::Unhandled)
    }

    /// Run one handler and wait for it to claim or decline the turn.
    async fn run_candidate(
        &self,
        entry: &RegisteredScript,
        request: &Request,
        matched: HandlerMatch,
        route: Route,
    ) -> Option<DispatchOutcome> {
        let script_id = entry.script.id();
        let session_id = request.session_id().clone();
        let (sink, output) = TurnSink::channel();
        let response = Response::new(session_id.clone(), self.config.response.max_speech_bytes, sink);

        tracing::debug!(script = %script_id, session = %session_id, ?route, "invoking handler");
        let HandlerRun { done, abort } = match entry.sandbox.run(request.clone(), matched, response).await {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(script = %script_id, error = %e, "handler could not start");
                return None;
            }
        };
        tokio::spawn(report_settled(script_id.to_string(), done));

        self.await_turn(script_id, &session_id, output, Some(abort), route)
            .await
    }

    /// Wait for the handler's output, bounded by the handler timeout.
    async fn await_turn(
        &self,
        script_id: &str,
        session_id: &SessionId,
        output: oneshot::Receiver<TurnOutput>,
        handler: Option<AbortHandle>,
        route: Route,
    ) -> Option<DispatchOutcome> {
        let timeout = self.config.dispatch.handler_timeout();
        let received = tokio::select! {
            biased;
            received = output => received.ok(),
            _ = tokio::time::sleep(timeout) => {
                if let Some(handler) = &handler {
                    handler.abort();
                }
                let e = HandlerError::Timeout { script: script_id.to_string(), after: timeout };
                tracing::warn!(session = %session_id, error = %e, "handler abandoned the turn");
                None
            }
        };

        let response = match received? {
            TurnOutput::Final(response) => {
                // `send` ends the session.
                self.sessions.release(session_id);
                response
            }
            TurnOutput::Listen { response, resolver } => {
                self.sessions.suspend(session_id.clone(), script_id, resolver, handler);
                response
            }
        };
        tracing::info!(script = %script_id, session = %session_id, ?route, "turn handled");
        Some(DispatchOutcome::Handled {
            script_id: script_id.to_string(),
            route,
            response,
        })
    }
}

async fn report_settled(script_id: String, done: oneshot::Receiver<Result<(), HandlerError>>) {
    match done.await {
        Ok(Err(e)) => tracing::warn!(script = %script_id, error = %e, "handler failed"),
        Ok(Ok(())) => {}
        Err(_) => tracing::debug!(script = %script_id, "sandbox went away before the handler settled"),
    }
}
