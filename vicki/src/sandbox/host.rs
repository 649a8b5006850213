//! Sandbox host
//!
//! One tokio task per script owns that script's listeners and serves a
//! mailbox. Nothing about a script is reachable from outside except through
//! `SandboxHandle` messages. Each handler invocation runs as its own task so
//! a handler suspended in `send_and_listen` does not block the mailbox, and a
//! panicking handler takes down only itself.

use super::listener::{HandlerContext, InstalledListeners};
use crate::error::{HandlerError, VickiError, VickiResult};
use crate::session::Response;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use vicki_script::listen;
use vicki_script::{HandlerMatch, Request, SessionId};

enum SandboxMessage {
    FindHandler {
        request: Request,
        reply: oneshot::Sender<Option<HandlerMatch>>,
    },
    Run {
        request: Request,
        matched: HandlerMatch,
        response: Response,
        reply: oneshot::Sender<Result<HandlerRun, HandlerError>>,
    },
    Status {
        reply: oneshot::Sender<SandboxStatus>,
    },
    Settled {
        run: u64,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A handler invocation in flight.
#[derive(Debug)]
pub struct HandlerRun {
    /// Resolves once the handler future settles.
    pub done: oneshot::Receiver<Result<(), HandlerError>>,
    pub abort: AbortHandle,
}

/// In-flight handlers of one sandbox, per session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxStatus {
    pub script_id: String,
    pub busy: BTreeMap<SessionId, usize>,
}

impl SandboxStatus {
    pub fn in_flight(&self) -> usize {
        self.busy.values().sum()
    }

    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.busy.contains_key(session_id)
    }
}

#[derive(Clone)]
pub struct SandboxHandle {
    script_id: Arc<str>,
    mailbox: mpsc::Sender<SandboxMessage>,
}

impl SandboxHandle {
    pub fn script_id(&self) -> &str {
        &self.script_id
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SandboxMessage) -> VickiResult<T> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(build(reply))
            .await
            .map_err(|_| VickiError::SandboxClosed(self.script_id.to_string()))?;
        rx.await
            .map_err(|_| VickiError::SandboxClosed(self.script_id.to_string()))
    }

    /// Which of this script's handlers would take the request, if any.
    pub async fn find_handler(&self, request: &Request) -> VickiResult<Option<HandlerMatch>> {
        let request = request.clone();
        self.request(|reply| SandboxMessage::FindHandler { request, reply })
            .await
    }

    pub async fn run(&self, request: Request, matched: HandlerMatch, response: Response) -> VickiResult<HandlerRun> {
        let run = self
            .request(|reply| SandboxMessage::Run {
                request,
                matched,
                response,
                reply,
            })
            .await?;
        Ok(run?)
    }

    pub async fn status(&self) -> VickiResult<SandboxStatus> {
        self.request(|reply| SandboxMessage::Status { reply }).await
    }

    /// Stop the sandbox and abort its handlers. Returns once it has stopped.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| SandboxMessage::Shutdown { reply }).await;
    }
}

struct InFlight {
    session_id: SessionId,
    abort: AbortHandle,
}

struct Sandbox {
    script_id: Arc<str>,
    listeners: InstalledListeners,
    // Weak so the sandbox stops once every handle is gone.
    mailbox: mpsc::WeakSender<SandboxMessage>,
    in_flight: HashMap<u64, InFlight>,
    next_run: u64,
}

impl Sandbox {
    async fn serve(mut self, mut inbox: mpsc::Receiver<SandboxMessage>) {
        tracing::debug!(script = %self.script_id, "sandbox started");
        while let Some(message) = inbox.recv().await {
            match message {
                SandboxMessage::FindHandler { request, reply } => {
                    let _ = reply.send(self.find_handler(&request));
                }
                SandboxMessage::Run {
                    request,
                    matched,
                    response,
                    reply,
                } => {
                    let run = self.run(request, matched, response);
                    let _ = reply.send(run);
                }
                SandboxMessage::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                SandboxMessage::Settled { run } => {
                    self.in_flight.remove(&run);
                }
                SandboxMessage::Shutdown { reply } => {
                    inbox.close();
                    for (_, handler) in self.in_flight.drain() {
                        handler.abort.abort();
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
        for (_, handler) in self.in_flight.drain() {
            handler.abort.abort();
        }
        tracing::debug!(script = %self.script_id, "sandbox stopped");
    }

    fn find_handler(&self, request: &Request) -> Option<HandlerMatch> {
        let listeners = &self.listeners;
        // Preconditions are script code and may panic.
        match catch_unwind(AssertUnwindSafe(|| {
            listen::find_match(&listeners.conditions, &listeners.preconditions, request)
        })) {
            Ok(found) => found,
            Err(panic) => {
                tracing::warn!(
                    script = %self.script_id,
                    error = %panic_message(panic.as_ref()),
                    "precondition panicked, treating as no match"
                );
                None
            }
        }
    }

    fn run(&mut self, request: Request, matched: HandlerMatch, response: Response) -> Result<HandlerRun, HandlerError> {
        let handler = self
            .listeners
            .handlers
            .get(matched.handler)
            .cloned()
            .ok_or_else(|| HandlerError::Failed {
                script: self.script_id.to_string(),
                message: format!("no handler in slot {}", matched.handler),
            })?;
        let run = self.next_run;
        self.next_run += 1;
        let session_id = request.session_id().clone();
        let (done_tx, done) = oneshot::channel();

        let ctx = HandlerContext {
            request,
            response,
            matched: matched.captures,
            vs: self.listeners.api.clone(),
        };
        let task = tokio::spawn(handler(ctx));
        let abort = task.abort_handle();
        self.in_flight.insert(
            run,
            InFlight {
                session_id,
                abort: abort.clone(),
            },
        );

        let script = self.script_id.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(HandlerError::Failed {
                    script: script.to_string(),
                    message: format!("{:#}", e),
                }),
                Err(e) if e.is_panic() => Err(HandlerError::Panicked {
                    script: script.to_string(),
                    message: panic_message(e.into_panic().as_ref()),
                }),
                Err(_) => {
                    tracing::debug!(script = %script, "handler aborted");
                    Ok(())
                }
            };
            let _ = done_tx.send(outcome);
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(SandboxMessage::Settled { run }).await;
            }
        });

        Ok(HandlerRun { done, abort })
    }

    fn status(&self) -> SandboxStatus {
        let mut busy = BTreeMap::new();
        for handler in self.in_flight.values() {
            *busy.entry(handler.session_id.clone()).or_insert(0) += 1;
        }
        SandboxStatus {
            script_id: self.script_id.to_string(),
            busy,
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Arena of running sandboxes, keyed by script id.
pub struct SandboxHost {
    sandboxes: DashMap<String, SandboxHandle>,
    mailbox_capacity: usize,
}

impl SandboxHost {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            sandboxes: DashMap::new(),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    pub fn spawn(&self, script_id: &str, listeners: InstalledListeners) -> SandboxHandle {
        let (mailbox, inbox) = mpsc::channel(self.mailbox_capacity);
        let script_id: Arc<str> = Arc::from(script_id);
        let sandbox = Sandbox {
            script_id: script_id.clone(),
            listeners,
            mailbox: mailbox.downgrade(),
            in_flight: HashMap::new(),
            next_run: 0,
        };
        tokio::spawn(sandbox.serve(inbox));

        let handle = SandboxHandle { script_id, mailbox };
        if let Some(previous) = self.sandboxes.insert(handle.script_id.to_string(), handle.clone()) {
            tracing::warn!(script = %previous.script_id, "sandbox replaced without shutdown");
        }
        handle
    }

    pub fn get(&self, script_id: &str) -> Option<SandboxHandle> {
        self.sandboxes.get(script_id).map(|h| h.clone())
    }

    pub async fn shutdown(&self, script_id: &str) -> bool {
        let Some((_, handle)) = self.sandboxes.remove(script_id) else {
            return false;
        };
        handle.shutdown().await;
        true
    }

    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.sandboxes.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.shutdown(&id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }
}
