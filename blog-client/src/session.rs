//! Who is signed in, passed explicitly to whatever needs to know.
//!
//! [`SessionManager`] is the only thing that changes the session; it hands
//! out read-only [`SessionContext`] handles which observe every change.

use crate::AuthApi;
use crate::error::BlogClientError;
use crate::model::{ProfileSeed, Session};
use crate::store::{KeyValueStore, REMEMBER_ME_KEY, SESSION_KEY};
use crate::validation::{validate_credentials, validate_nickname};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionContext {
    rx: watch::Receiver<Option<Session>>,
}

impl SessionContext {
    /// A context that is permanently signed out.
    pub fn anonymous() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn current(&self) -> Option<Session> {
        self.rx.borrow().clone()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.rx.borrow().as_ref().map(|s| s.user.id)
    }

    pub fn is_signed_in(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn require_user(&self) -> Result<Uuid, BlogClientError> {
        self.user_id().ok_or(BlogClientError::Unauthorized)
    }

    /// Auth state change notifications.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.rx.clone()
    }

    /// Waits for the next sign-in, sign-out or refresh.
    pub async fn changed(&mut self) -> Option<Session> {
        match self.rx.changed().await {
            Ok(()) => self.rx.borrow_and_update().clone(),
            Err(_) => None,
        }
    }
}

pub struct SessionManager<A: AuthApi, S: KeyValueStore> {
    auth: Arc<A>,
    store: Arc<S>,
    tx: watch::Sender<Option<Session>>,
}

impl<A, S> SessionManager<A, S>
where
    A: AuthApi,
    S: KeyValueStore,
{
    pub fn new(auth: Arc<A>, store: Arc<S>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { auth, store, tx }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            rx: self.tx.subscribe(),
        }
    }

    pub fn remember_me(&self) -> bool {
        self.store.get_json(REMEMBER_ME_KEY).unwrap_or(false)
    }

    pub fn set_remember_me(&self, remember: bool) -> Result<(), BlogClientError> {
        self.store.set_json(REMEMBER_ME_KEY, &remember)
    }

    fn publish(&self, session: Option<Session>) {
        self.tx.send_replace(session);
    }

    fn persist(&self, session: &Session, remember: bool) {
        let result = self
            .store
            .set_json(REMEMBER_ME_KEY, &remember)
            .and_then(|_| {
                if remember {
                    self.store.set_json(SESSION_KEY, session)
                } else {
                    self.store.remove(SESSION_KEY)
                }
            });
        if let Err(err) = result {
            warn!(error = %err, "could not persist session state");
        }
    }

    #[instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: ProfileSeed,
    ) -> Result<Session, BlogClientError> {
        validate_credentials(email, password)?;
        validate_nickname(&seed.nickname)?;
        let seed = ProfileSeed {
            nickname: seed.nickname.trim().to_string(),
        };
        let session = self.auth.sign_up(email.trim(), password, seed).await?;
        info!(user_id = %session.user.id, "signed up");
        self.persist(&session, self.remember_me());
        self.publish(Some(session.clone()));
        Ok(session)
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Session, BlogClientError> {
        validate_credentials(email, password)?;
        let session = self.auth.sign_in_with_password(email.trim(), password).await?;
        info!(user_id = %session.user.id, "signed in");
        self.persist(&session, remember_me);
        self.publish(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), BlogClientError> {
        self.auth.sign_out().await?;
        if let Err(err) = self.store.remove(SESSION_KEY) {
            warn!(error = %err, "could not forget stored session");
        }
        self.publish(None);
        Ok(())
    }

    pub async fn refresh(&self) -> Result<Session, BlogClientError> {
        match self.auth.refresh_session().await {
            Ok(session) => {
                self.persist(&session, self.remember_me());
                self.publish(Some(session.clone()));
                Ok(session)
            }
            Err(BlogClientError::Unauthorized) => {
                self.sign_out().await?;
                Err(BlogClientError::Unauthorized)
            }
            Err(err) => Err(err),
        }
    }

    /// Re-installs a remembered session, dropping it if it has expired.
    pub async fn restore(&self) -> Option<Session> {
        if !self.remember_me() {
            return None;
        }
        let session: Session = self.store.get_json(SESSION_KEY)?;
        if session.is_expired(Utc::now()) {
            info!("remembered session expired");
            if let Err(err) = self.store.remove(SESSION_KEY) {
                debug!(error = %err, "expired session not removed");
            }
            return None;
        }
        self.auth.set_session(Some(session.clone())).await;
        self.publish(Some(session.clone()));
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn manager() -> SessionManager<MemoryBackend, MemoryStore> {
        SessionManager::new(Arc::new(MemoryBackend::new()), Arc::new(MemoryStore::new()))
    }

    fn seed(nickname: &str) -> ProfileSeed {
        ProfileSeed {
            nickname: nickname.into(),
        }
    }

    #[tokio::test]
    async fn contexts_observe_sign_in_and_out() {
        let manager = manager();
        let mut ctx = manager.context();
        assert!(!ctx.is_signed_in());

        let session = manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        assert_eq!(ctx.changed().await.map(|s| s.user.id), Some(session.user.id));
        assert_eq!(ctx.user_id(), Some(session.user.id));

        manager.sign_out().await.unwrap();
        assert_eq!(ctx.changed().await, None);
        assert!(matches!(ctx.require_user(), Err(BlogClientError::Unauthorized)));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_backend() {
        let manager = manager();
        let err = manager.sign_in("nope", "secret1", false).await.unwrap_err();
        assert!(matches!(err, BlogClientError::Validation(_)));
        let err = manager.sign_up("a@b.c", "secret1", seed("x")).await.unwrap_err();
        assert!(matches!(err, BlogClientError::Validation(_)));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let manager = manager();
        manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        manager.sign_out().await.unwrap();
        let err = manager.sign_in("a@b.c", "wrong-pass", false).await.unwrap_err();
        assert!(matches!(err, BlogClientError::Unauthorized));
        assert!(!manager.context().is_signed_in());
    }

    #[tokio::test]
    async fn remember_me_persists_and_restores_session() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryStore::new());
        let first = SessionManager::new(backend.clone(), store.clone());
        first.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        first.sign_out().await.unwrap();
        let session = first.sign_in("A@B.C", "secret1", true).await.unwrap();
        assert!(first.remember_me());

        backend.sign_out().await.unwrap();
        let second = SessionManager::new(backend.clone(), store);
        let restored = second.restore().await.unwrap();
        assert_eq!(restored.user.id, session.user.id);
        assert!(second.context().is_signed_in());
        assert_eq!(
            backend.get_session().await.map(|s| s.user.id),
            Some(session.user.id)
        );
    }

    #[tokio::test]
    async fn without_remember_me_nothing_is_restored() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(Arc::new(MemoryBackend::new()), store.clone());
        manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        assert!(store.get(SESSION_KEY).is_none());
        assert!(manager.restore().await.is_none());
    }

    #[tokio::test]
    async fn remember_me_chosen_before_sign_up_keeps_session() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(Arc::new(MemoryBackend::new()), store.clone());
        manager.set_remember_me(true).unwrap();
        manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        assert!(store.get(SESSION_KEY).is_some());
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped_on_restore() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(Arc::new(MemoryBackend::new()), store.clone());
        let mut session = manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        session.expires_at = Utc::now() - Duration::seconds(1);
        store.set_json(REMEMBER_ME_KEY, &true).unwrap();
        store.set_json(SESSION_KEY, &session).unwrap();

        assert!(manager.restore().await.is_none());
        assert!(store.get(SESSION_KEY).is_none());
    }

    /// A store that can read and write but never delete.
    #[derive(Default)]
    struct StickyStore(MemoryStore);

    impl KeyValueStore for StickyStore {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: String) -> Result<(), BlogClientError> {
            self.0.set(key, value)
        }

        fn remove(&self, _key: &str) -> Result<(), BlogClientError> {
            Err(BlogClientError::Storage("read-only".into()))
        }
    }

    #[tokio::test]
    async fn expired_session_is_not_restored_when_it_cannot_be_removed() {
        let store = Arc::new(StickyStore::default());
        let manager = SessionManager::new(Arc::new(MemoryBackend::new()), store.clone());
        let mut session = manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        session.expires_at = Utc::now() - Duration::seconds(1);
        store.set_json(REMEMBER_ME_KEY, &true).unwrap();
        store.set_json(SESSION_KEY, &session).unwrap();

        assert!(manager.restore().await.is_none());
        assert!(!manager.context().is_signed_in());
        assert!(store.get(SESSION_KEY).is_some());
    }

    #[tokio::test]
    async fn refresh_requires_a_session() {
        let manager = manager();
        assert!(matches!(
            manager.refresh().await,
            Err(BlogClientError::Unauthorized)
        ));
        manager.sign_up("a@b.c", "secret1", seed("alice")).await.unwrap();
        let refreshed = manager.refresh().await.unwrap();
        assert_eq!(manager.context().user_id(), Some(refreshed.user.id));
    }
}
