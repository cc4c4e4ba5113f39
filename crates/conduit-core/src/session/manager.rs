//! Session Manager for per-conversation orchestrators

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::orchestrator::Orchestrator;

/// Builds the orchestrator for a conversation seen for the first time
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, conversation_id: &str) -> Result<Orchestrator>;
}

#[async_trait]
impl<F, Fut> SessionFactory for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Orchestrator>> + Send + 'static,
{
    async fn create(&self, conversation_id: &str) -> Result<Orchestrator> {
        (self)(conversation_id.to_string()).await
    }
}

/// One conversation's orchestrator plus its last activity time
pub struct ConversationSession {
    id: String,
    orchestrator: Mutex<Orchestrator>,
    last_active: parking_lot::Mutex<Instant>,
}

impl ConversationSession {
    fn new(id: String, orchestrator: Orchestrator) -> Self {
        Self {
            id,
            orchestrator: Mutex::new(orchestrator),
            last_active: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exclusive access to the orchestrator. Counts as activity.
    pub async fn orchestrator(&self) -> MutexGuard<'_, Orchestrator> {
        self.touch();
        let guard = self.orchestrator.lock().await;
        self.touch();
        guard
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// True while a caller holds the orchestrator
    fn is_busy(&self) -> bool {
        self.orchestrator.try_lock().is_err()
    }
}

/// A session is reapable only when the registry holds the sole reference
fn is_held_elsewhere(session: &Arc<ConversationSession>) -> bool {
    Arc::strong_count(session) > 1
}

/// Registry of live conversation sessions
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<ConversationSession>>>>,
    factory: Arc<dyn SessionFactory>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new<F>(factory: F, idle_timeout: Duration) -> Self
    where
        F: SessionFactory + 'static,
    {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(factory),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Session for `conversation_id`, created on first use.
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<Arc<ConversationSession>> {
        if let Some(session) = self.sessions.read().await.get(conversation_id) {
            session.touch();
            return Ok(session.clone());
        }

        info!(conversation = %conversation_id, "creating conversation session");
        let orchestrator = self.factory.create(conversation_id).await?;
        let created = Arc::new(ConversationSession::new(conversation_id.to_string(), orchestrator));

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(conversation_id) {
            // Lost a creation race; keep the first one.
            let existing = existing.clone();
            existing.touch();
            drop(sessions);
            created.orchestrator.lock().await.close().await;
            return Ok(existing);
        }
        sessions.insert(conversation_id.to_string(), created.clone());
        Ok(created)
    }

    /// Run one chat turn in the conversation's own orchestrator.
    pub async fn chat(&self, conversation_id: &str, prompt: &str) -> Result<String> {
        let session = self.get_or_create(conversation_id).await?;
        let mut orchestrator = session.orchestrator().await;
        let answer = orchestrator.chat(prompt).await;
        session.touch();
        answer
    }

    pub async fn has_session(&self, conversation_id: &str) -> bool {
        self.sessions.read().await.contains_key(conversation_id)
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close and forget a session. Returns `false` if it did not exist.
    pub async fn dispose(&self, conversation_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(conversation_id);
        match removed {
            Some(session) => {
                session.orchestrator.lock().await.close().await;
                info!(conversation = %conversation_id, "disposed conversation session");
                true
            }
            None => false,
        }
    }

    /// Dispose every session idle for longer than the timeout. Sessions in
    /// the middle of a chat, or still held by a caller, are left alone.
    pub async fn dispose_idle(&self) -> usize {
        let expired: Vec<Arc<ConversationSession>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| !s.is_busy() && !is_held_elsewhere(s) && s.idle_for() > self.idle_timeout)
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            debug!(conversation = %session.id, idle = ?session.idle_for(), "session idle, disposing");
            session.orchestrator.lock().await.close().await;
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "disposed idle conversation sessions");
        }
        expired.len()
    }

    /// Background task calling [`dispose_idle`](Self::dispose_idle) every `interval`.
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.dispose_idle().await;
            }
        })
    }

    /// Close every session
    pub async fn close_all(&self) {
        let drained: Vec<Arc<ConversationSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.orchestrator.lock().await.close().await;
        }
    }
}
