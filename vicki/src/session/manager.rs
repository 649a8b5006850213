//! Continuation bookkeeping
//!
//! A `Session` exists while a handler sits in `send_and_listen`. It holds the
//! resolver that resumes that handler. Sessions are keyed by platform session
//! id, so there is at most one suspended handler per conversation.

use super::response::{Resumption, TurnSink};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use uuid::Uuid;
use vicki_script::{Request, SessionId};

pub struct Session {
    session_id: SessionId,
    owner: String,
    token: Uuid,
    resolver: oneshot::Sender<Resumption>,
    handler: Option<AbortHandle>,
    timer: Option<AbortHandle>,
    suspended_at: DateTime<Utc>,
}

impl Session {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn suspended_at(&self) -> DateTime<Utc> {
        self.suspended_at
    }

    /// Hand the follow-up request to the suspended handler. Gives the
    /// resumption back if the handler is gone.
    pub fn resume(mut self, request: Request, sink: TurnSink) -> Result<ResumedHandler, Resumption> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.resolver.send(Resumption { request, sink })?;
        Ok(ResumedHandler {
            owner: self.owner,
            handler: self.handler,
        })
    }

    /// Resume with the cancellation request; whatever the handler says next
    /// goes nowhere.
    fn cancel(self) {
        let request = Request::cancellation(self.session_id.clone());
        let session_id = self.session_id.clone();
        if self.resume(request, TurnSink::Detached).is_err() {
            tracing::debug!(session = %session_id, "suspended handler was already gone");
        }
    }
}

/// Handle on a handler that was just resumed.
#[derive(Debug)]
pub struct ResumedHandler {
    pub owner: String,
    handler: Option<AbortHandle>,
}

impl ResumedHandler {
    pub fn handle(&self) -> Option<AbortHandle> {
        self.handler.clone()
    }

    pub fn abort(&self) {
        if let Some(handler) = &self.handler {
            handler.abort();
        }
    }
}

/// Read-only view of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub owner: String,
    pub suspended_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Session>>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Record a suspended handler. A previous continuation of the same session
    /// is cancelled first.
    pub fn suspend(
        &self,
        session_id: SessionId,
        owner: &str,
        resolver: oneshot::Sender<Resumption>,
        handler: Option<AbortHandle>,
    ) {
        let token = Uuid::new_v4();
        let session = Session {
            session_id: session_id.clone(),
            owner: owner.to_string(),
            token,
            resolver,
            handler,
            timer: None,
            suspended_at: Utc::now(),
        };
        if let Some(previous) = self.sessions.insert(session_id.clone(), session) {
            tracing::warn!(
                session = %session_id,
                previous_owner = %previous.owner,
                "replacing an open continuation"
            );
            previous.cancel();
        }

        let sessions = self.sessions.clone();
        let timeout = self.timeout;
        let expiring = session_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, session)) = sessions.remove_if(&expiring, |_, s| s.token == token) {
                tracing::info!(
                    session = %expiring,
                    script = %session.owner,
                    "continuation timed out, resuming with cancel"
                );
                session.cancel();
            }
        });
        if let Some(mut entry) = self.sessions.get_mut(&session_id) {
            if entry.token == token {
                entry.timer = Some(timer.abort_handle());
            }
        }
        tracing::debug!(session = %session_id, script = %owner, "handler suspended");
    }

    /// Remove the session so its handler can be resumed.
    pub fn take(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn owner(&self, session_id: &SessionId) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.owner.clone())
    }

    /// Close a session, resuming its handler with the cancellation request.
    pub fn release(&self, session_id: &SessionId) -> bool {
        match self.take(session_id) {
            Some(session) => {
                tracing::debug!(session = %session_id, script = %session.owner, "session released");
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every continuation owned by `script_id` without resuming it.
    pub fn release_owned_by(&self, script_id: &str) -> usize {
        let owned: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.owner == script_id)
            .map(|entry| entry.key().clone())
            .collect();
        owned
            .iter()
            .filter_map(|id| self.take(id))
            .map(|session| {
                if let Some(timer) = &session.timer {
                    timer.abort();
                }
                if let Some(handler) = &session.handler {
                    handler.abort();
                }
            })
            .count()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                session_id: entry.session_id.clone(),
                owner: entry.owner.clone(),
                suspended_at: entry.suspended_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.release(&id);
        }
    }
}
