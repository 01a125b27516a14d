use super::token_store::{normalize, TokenStore};
use crate::identity::decode_identity;
use crate::types::{Session, SessionEvent, SessionStatus};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{broadcast, Mutex};

const EVENT_CHANNEL_CAPACITY: usize = 16;

fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// The single owner of the current session.
///
/// Clones share state. The in-memory session is authoritative for the running
/// process; the [`TokenStore`] only carries the token across restarts, so a
/// store failure is logged and never blocks a state transition.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    current: Arc<Mutex<Option<Session>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            current: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Restores a persisted token, if any. Safe to call more than once; an
    /// in-memory session always wins over the store.
    pub async fn init(&self) -> SessionStatus {
        let mut guard = self.current.lock().await;
        if guard.is_some() {
            return SessionStatus::Authenticated;
        }

        match self.store.load() {
            Ok(Some(token)) => {
                let identity = decode_identity(&token);
                tracing::debug!(
                    backend = self.store.backend_name(),
                    user_id = identity.as_ref().and_then(|i| i.user_id.as_deref()),
                    "restored persisted session"
                );
                *guard = Some(Session::new(token, identity, now_iso()));
                SessionStatus::Authenticated
            }
            Ok(None) => SessionStatus::Unauthenticated,
            Err(e) => {
                tracing::warn!(backend = self.store.backend_name(), "failed to read persisted token: {e}");
                SessionStatus::Unauthenticated
            }
        }
    }

    pub async fn status(&self) -> SessionStatus {
        if self.current.lock().await.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Unauthenticated
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    /// The current bearer token. A blank token never counts as a session.
    pub async fn token(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.token().trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Replaces whatever session exists with one for `token`. Returns `None`
    /// and leaves the current session untouched when `token` is blank.
    pub async fn establish(&self, token: String) -> Option<Session> {
        let Some(token) = normalize(token) else {
            tracing::warn!("refusing to establish a session from a blank token");
            return None;
        };
        let identity = decode_identity(&token);
        let session = Session::new(token, identity, now_iso());

        {
            let mut guard = self.current.lock().await;
            *guard = Some(session.clone());
            if let Err(e) = self.store.save(session.token()) {
                tracing::warn!(
                    backend = self.store.backend_name(),
                    "session kept in memory only, failed to persist token: {e}"
                );
            }
        }

        self.emit(SessionEvent::LoggedIn {
            identity: session.identity().cloned(),
        });
        Some(session)
    }

    /// Drops the session and the persisted token. Returns whether a session was
    /// actually removed; evicting an empty session is a no-op.
    pub async fn evict(&self) -> bool {
        let removed = {
            let mut guard = self.current.lock().await;
            let removed = guard.take().is_some();
            self.clear_store();
            removed
        };
        if removed {
            self.emit(SessionEvent::LoggedOut);
        }
        removed
    }

    /// Evicts only if the session still holds `token`, so a 401 for a token
    /// that has since been replaced leaves the newer session alone.
    pub(crate) async fn expire(&self, token: &str) -> bool {
        let removed = {
            let mut guard = self.current.lock().await;
            match guard.as_ref() {
                Some(session) if session.token() == token => {
                    guard.take();
                    self.clear_store();
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.emit(SessionEvent::Expired);
        }
        removed
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(backend = self.store.backend_name(), "failed to clear persisted token: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryTokenStore, TokenStore};

    fn manager() -> (SessionManager, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        (SessionManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn init_restores_persisted_token() {
        let store = Arc::new(MemoryTokenStore::with_token("T1"));
        let session = SessionManager::new(store);
        assert_eq!(session.status().await, SessionStatus::Unauthenticated);
        assert_eq!(session.init().await, SessionStatus::Authenticated);
        assert_eq!(session.token().await.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn init_without_persisted_token_stays_unauthenticated() {
        let (session, _) = manager();
        assert_eq!(session.init().await, SessionStatus::Unauthenticated);
        assert!(session.current().await.is_none());
    }

    #[tokio::test]
    async fn establish_persists_and_broadcasts() {
        let (session, store) = manager();
        let mut events = session.subscribe();

        let created = session.establish("T1".to_string()).await.unwrap();
        assert_eq!(created.token(), "T1");
        assert_eq!(store.load().unwrap().as_deref(), Some("T1"));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LoggedIn { identity: None }
        );
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let (session, store) = manager();
        session.establish("T1".to_string()).await;
        let mut events = session.subscribe();

        assert!(session.evict().await);
        assert!(!session.evict().await);
        assert_eq!(session.status().await, SessionStatus::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn expire_ignores_replaced_token() {
        let (session, store) = manager();
        session.establish("T2".to_string()).await;

        assert!(!session.expire("T1").await);
        assert_eq!(session.token().await.as_deref(), Some("T2"));
        assert_eq!(store.load().unwrap().as_deref(), Some("T2"));

        let mut events = session.subscribe();
        assert!(session.expire("T2").await);
        assert_eq!(session.status().await, SessionStatus::Unauthenticated);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn establish_trims_and_rejects_blank_tokens() {
        let (session, store) = manager();
        let mut events = session.subscribe();

        assert!(session.establish("   ".to_string()).await.is_none());
        assert_eq!(session.status().await, SessionStatus::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
        assert!(events.try_recv().is_err());

        let created = session.establish(" T1\n".to_string()).await.unwrap();
        assert_eq!(created.token(), "T1");
        assert!(session.establish(String::new()).await.is_none());
        assert_eq!(session.token().await.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn store_follows_memory_when_login_and_logout_race() {
        let (session, store) = manager();
        for _ in 0..50 {
            let other = session.clone();
            let (_, _) = tokio::join!(
                tokio::spawn(async move { other.establish("T2".to_string()).await }),
                session.evict(),
            );
            assert_eq!(session.token().await, store.load().unwrap());
            session.evict().await;
        }
    }
}
