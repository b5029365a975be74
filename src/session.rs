use crate::errors::AppError;
use crate::token_store::{fingerprint, TokenStore};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Holder of the current bearer token.
///
/// Constructed once and shared (`Arc<SessionContext>`) with every component
/// that needs the token. All writes go through [`login`](Self::login) and
/// [`logout`](Self::logout).
pub struct SessionContext {
    store: TokenStore,
    token: watch::Sender<String>,
}

impl SessionContext {
    /// Builds a session from the stored token, folding legacy keys into the
    /// canonical one first.
    pub fn new(store: TokenStore) -> Result<Self, AppError> {
        let initial = store.migrate_legacy()?.unwrap_or_default();
        if !initial.is_empty() {
            tracing::info!("Session resumed with token {}", fingerprint(&initial));
        }
        let (token, _) = watch::channel(initial);
        Ok(Self { store, token })
    }

    /// Current token; empty when logged out.
    pub fn token(&self) -> String {
        self.token.borrow().clone()
    }

    /// Current token, or `None` when logged out.
    pub fn bearer(&self) -> Option<String> {
        let token = self.token();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.token.borrow().is_empty()
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn login(&self, token: &str) -> Result<(), AppError> {
        self.store.set_token(token)?;
        self.token.send_replace(token.to_string());
        tracing::info!("Logged in with token {}", fingerprint(token));
        Ok(())
    }

    pub fn logout(&self) -> Result<(), AppError> {
        self.store.clear_token()?;
        self.token.send_replace(String::new());
        tracing::info!("Logged out");
        Ok(())
    }

    /// Re-reads the token from storage. Returns `true` if it changed.
    pub fn resync(&self) -> bool {
        let stored = self.store.get_token();
        let changed = self.token.send_if_modified(|current| {
            if *current == stored {
                false
            } else {
                *current = stored.clone();
                true
            }
        });
        if changed {
            tracing::info!("Token changed in storage, session re-synchronized");
        }
        changed
    }

    /// Observes token changes.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.token.subscribe()
    }

    /// Keeps the cached token in sync with storage changes until the returned
    /// guard is dropped.
    pub fn watch_storage(self: &Arc<Self>) -> StorageWatch {
        let mut events = self.store.subscribe();
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!("Storage event for {:?}", event.key);
                        session.resync();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Missed {} storage event(s), resyncing", skipped);
                        session.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        StorageWatch { handle }
    }
}

/// Subscription to storage changes; unsubscribes on drop.
pub struct StorageWatch {
    handle: JoinHandle<()>,
}

impl StorageWatch {
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StorageWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::time::Duration;

    fn session() -> Arc<SessionContext> {
        Arc::new(SessionContext::new(TokenStore::in_memory()).unwrap())
    }

    #[test]
    fn test_starts_from_stored_token() {
        let store = TokenStore::in_memory();
        store.set_token_under("jwt", "resumed").unwrap();
        let session = SessionContext::new(store.clone()).unwrap();
        assert_eq!(session.token(), "resumed");
        // Migrated to the canonical key
        assert_eq!(store.local().get("access_token").as_deref(), Some("resumed"));
        assert_eq!(store.local().get("jwt"), None);
    }

    #[test]
    fn test_login_logout() {
        let session = session();
        assert!(!session.is_authenticated());
        assert_eq!(session.bearer(), None);

        session.login("t-1").unwrap();
        assert_eq!(session.token(), "t-1");
        assert_eq!(session.store().get_token(), "t-1");

        session.logout().unwrap();
        assert_eq!(session.token(), "");
        assert_eq!(session.store().get_token(), "");
    }

    #[tokio::test]
    async fn test_resyncs_on_external_change() {
        let local: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let store = TokenStore::new(local.clone(), Arc::new(MemoryStore::new()));
        let session = Arc::new(SessionContext::new(store).unwrap());
        let mut changes = session.subscribe();
        let _watch = session.watch_storage();

        // Another tab logs in
        local.set("access_token", "other-tab").unwrap();
        tokio::time::timeout(Duration::from_secs(1), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.token(), "other-tab");

        // ...and logs out
        local.remove("access_token").unwrap();
        tokio::time::timeout(Duration::from_secs(1), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.token(), "");
    }

    #[tokio::test]
    async fn test_dropping_watch_unsubscribes() {
        let local: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let store = TokenStore::new(local.clone(), Arc::new(MemoryStore::new()));
        let session = Arc::new(SessionContext::new(store).unwrap());

        let watch = session.watch_storage();
        assert!(watch.is_active());
        drop(watch);
        tokio::task::yield_now().await;

        local.set("access_token", "ignored").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.token(), "");
        assert!(session.resync());
        assert_eq!(session.token(), "ignored");
    }
}
