//! Chat session management
//!
//! Each session owns its bounded conversation history; the generation
//! path for a session is the only writer. Sessions expire after a
//! configurable idle TTL and are swept by a background task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use guideline_rag_core::ConversationHistory;

use crate::ServerError;

/// One chat session.
pub struct ChatSession {
    pub id: String,
    pub history: Arc<Mutex<ConversationHistory>>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, max_history_length: usize) -> Self {
        Self {
            id: id.into(),
            history: Arc::new(Mutex::new(ConversationHistory::new(max_history_length))),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.read().elapsed() > ttl
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Session manager over a concurrent map.
pub struct SessionManager {
    sessions: DashMap<String, Arc<ChatSession>>,
    max_sessions: usize,
    session_ttl: Duration,
    max_history_length: usize,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, session_ttl: Duration, max_history_length: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            session_ttl,
            max_history_length,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    /// Look up an existing session or mint a new one. A fresh id is
    /// generated when the client supplies none.
    pub fn get_or_create(&self, session_id: Option<&str>) -> Result<Arc<ChatSession>, ServerError> {
        if let Some(id) = session_id {
            if let Some(session) = self.sessions.get(id) {
                return Ok(Arc::clone(&session));
            }
        }

        if self.sessions.len() >= self.max_sessions {
            self.cleanup_expired();
            if self.sessions.len() >= self.max_sessions {
                return Err(ServerError::Session("Max sessions reached".to_string()));
            }
        }

        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let session = Arc::new(ChatSession::new(&id, self.max_history_length));
        self.sessions.insert(id.clone(), Arc::clone(&session));

        tracing::info!(session_id = %id, "Created session");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            tracing::info!(session_id = %id, "Removed session");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove every session past its idle TTL.
    pub fn cleanup_expired(&self) {
        let ttl = self.session_ttl;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(ttl))
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired {
            self.sessions.remove(&id);
            tracing::info!(session_id = %id, "Expired session");
        }
    }

    /// Start a background sweep of expired sessions. Returns a shutdown
    /// sender that stops the task.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let before = manager.count();
                        manager.cleanup_expired();
                        let after = manager.count();
                        if before != after {
                            tracing::info!(
                                removed = before - after,
                                remaining = after,
                                "Session cleanup"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(10, Duration::from_secs(1800), 10)
    }

    #[test]
    fn test_mints_id_when_none_supplied() {
        let manager = manager();
        let session = manager.get_or_create(None).unwrap();
        assert!(!session.id.is_empty());
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_reuses_existing_session() {
        let manager = manager();
        let first = manager.get_or_create(Some("s1")).unwrap();
        first.history.lock().push("q".to_string(), "a".to_string());

        let second = manager.get_or_create(Some("s1")).unwrap();
        assert_eq!(second.history.lock().len(), 1);
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let manager = SessionManager::new(2, Duration::from_secs(1800), 10);
        manager.get_or_create(None).unwrap();
        manager.get_or_create(None).unwrap();
        assert!(manager.get_or_create(None).is_err());
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let manager = SessionManager::new(10, Duration::from_millis(0), 10);
        manager.get_or_create(Some("s1")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        manager.cleanup_expired();
        assert_eq!(manager.count(), 0);
    }
}
