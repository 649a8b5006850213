//! Script programs and the listen API
//!
//! A script's body is a `ScriptProgram`: it runs once at load time against a
//! `Listener` and registers handlers for listen conditions, the way a script
//! file calls `$vs.listen.on(...)` at its top level.

use super::api::ScriptApi;
use crate::session::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use vicki_script::listen;
use vicki_script::{CompiledCondition, ListenCondition, ListenError, Precondition, RegexMatch, Request};

/// What a handler receives for one turn.
pub struct HandlerContext {
    pub request: Request,
    pub response: Response,
    pub matched: RegexMatch,
    pub vs: ScriptApi,
}

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type HandlerFn = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

pub trait ScriptProgram: Send + Sync {
    fn install(&self, listener: &mut Listener) -> anyhow::Result<()>;
}

impl<F> ScriptProgram for F
where
    F: Fn(&mut Listener) -> anyhow::Result<()> + Send + Sync,
{
    fn install(&self, listener: &mut Listener) -> anyhow::Result<()> {
        self(listener)
    }
}

/// Source text (for the metablock) paired with the program it declares.
#[derive(Clone)]
pub struct ScriptSource {
    pub source: String,
    pub program: Arc<dyn ScriptProgram>,
}

impl ScriptSource {
    pub fn new<F>(source: impl Into<String>, program: F) -> Self
    where
        F: Fn(&mut Listener) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            program: Arc::new(program),
        }
    }

    pub fn with_program(source: impl Into<String>, program: Arc<dyn ScriptProgram>) -> Self {
        Self {
            source: source.into(),
            program,
        }
    }
}

pub struct Listener {
    api: ScriptApi,
    conditions: Vec<CompiledCondition>,
    handlers: Vec<HandlerFn>,
    preconditions: Vec<Precondition>,
    error: Option<ListenError>,
}

impl Listener {
    pub(crate) fn new(api: ScriptApi) -> Self {
        Self {
            api,
            conditions: Vec::new(),
            handlers: Vec::new(),
            preconditions: Vec::new(),
            error: None,
        }
    }

    /// Capabilities are usable at install time too, e.g. to check
    /// `native().available()` before registering.
    pub fn api(&self) -> &ScriptApi {
        &self.api
    }

    pub fn listen<C, F, Fut>(&mut self, condition: C, handler: F) -> &mut Self
    where
        C: Into<ListenCondition>,
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.error.is_some() {
            return self;
        }
        let slot = self.handlers.len();
        match listen::compile(condition.into(), slot) {
            Ok(compiled) => {
                self.conditions.extend(compiled);
                self.handlers.push(Arc::new(move |ctx| handler(ctx).boxed()));
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Script-wide precondition, checked before any of this script's
    /// conditions.
    pub fn precondition(&mut self, predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> &mut Self {
        self.preconditions.push(Precondition::new(predicate));
        self
    }

    pub(crate) fn finish(self) -> Result<InstalledListeners, ListenError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(InstalledListeners {
            api: self.api,
            conditions: self.conditions,
            handlers: self.handlers,
            preconditions: self.preconditions,
        })
    }
}

/// Everything a sandbox needs to serve a script.
pub struct InstalledListeners {
    pub api: ScriptApi,
    pub conditions: Vec<CompiledCondition>,
    pub handlers: Vec<HandlerFn>,
    pub preconditions: Vec<Precondition>,
}
