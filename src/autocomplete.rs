//! Debounced schema/table suggestions.
//!
//! Each field has its own debounce: a keystroke schedules a lookup that only
//! runs if no newer keystroke arrived within the settle interval. Lookups of
//! the same kind are numbered, and a response is applied only if it belongs
//! to the most recently issued lookup, so a slow early response can never
//! overwrite a newer one. Lookup failures are logged and otherwise ignored.

use crate::api_client::ApiClient;
use crate::circuit_breaker::{create_catalog_circuit_breaker, CatalogBreaker};
use crate::errors::AppError;
use crate::session::SessionContext;
use crate::token_store::fingerprint;
use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const DEBOUNCE: Duration = Duration::from_millis(350);
pub const TABLE_SUGGESTION_LIMIT: u32 = 20;
const CACHE_TTL: Duration = Duration::from_secs(30);

/// Current suggestion lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suggestions {
    pub schemas: Vec<String>,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Fields {
    library: String,
    table: String,
}

#[derive(Clone, Copy)]
enum Field {
    Library,
    Table,
}

struct Inner {
    api: ApiClient,
    session: Arc<SessionContext>,
    debounce: Duration,
    /// What the user typed.
    typed: Mutex<Fields>,
    /// Values that survived the debounce.
    settled: Mutex<Fields>,
    library_keystrokes: AtomicU64,
    table_keystrokes: AtomicU64,
    schema_lookups: AtomicU64,
    table_lookups: AtomicU64,
    suggestions: watch::Sender<Suggestions>,
    cache: Cache<String, Vec<String>>,
    breaker: CatalogBreaker,
}

/// Autocomplete state for the library/table fields.
#[derive(Clone)]
pub struct CatalogAutocomplete {
    inner: Arc<Inner>,
}

impl CatalogAutocomplete {
    pub fn new(api: ApiClient, session: Arc<SessionContext>) -> Self {
        Self::with_debounce(api, session, DEBOUNCE)
    }

    pub fn with_debounce(api: ApiClient, session: Arc<SessionContext>, debounce: Duration) -> Self {
        let (suggestions, _) = watch::channel(Suggestions::default());
        let cache = Cache::builder()
            .time_to_live(CACHE_TTL)
            .max_capacity(1_000)
            .build();
        Self {
            inner: Arc::new(Inner {
                api,
                session,
                debounce,
                typed: Mutex::new(Fields::default()),
                settled: Mutex::new(Fields::default()),
                library_keystrokes: AtomicU64::new(0),
                table_keystrokes: AtomicU64::new(0),
                schema_lookups: AtomicU64::new(0),
                table_lookups: AtomicU64::new(0),
                suggestions,
                cache,
                breaker: create_catalog_circuit_breaker(),
            }),
        }
    }

    pub fn library(&self) -> String {
        lock(&self.inner.typed).library.clone()
    }

    pub fn table(&self) -> String {
        lock(&self.inner.typed).table.clone()
    }

    pub fn suggestions(&self) -> Suggestions {
        self.inner.suggestions.borrow().clone()
    }

    /// Observes suggestion updates.
    pub fn subscribe(&self) -> watch::Receiver<Suggestions> {
        self.inner.suggestions.subscribe()
    }

    /// Records a library keystroke and restarts its debounce.
    pub fn set_library(&self, text: &str) {
        lock(&self.inner.typed).library = text.to_string();
        self.schedule(Field::Library);
    }

    /// Records a table keystroke and restarts its debounce.
    pub fn set_table(&self, text: &str) {
        lock(&self.inner.typed).table = text.to_string();
        self.schedule(Field::Table);
    }

    /// Picks a schema suggestion: sets the field and closes the list.
    pub async fn select_schema(&self, schema: &str) {
        let inner = &self.inner;
        lock(&inner.typed).library = schema.to_string();
        lock(&inner.settled).library = schema.to_string();
        // Pending keystrokes and in-flight lookups are now stale
        inner.library_keystrokes.fetch_add(1, Ordering::SeqCst);
        inner.schema_lookups.fetch_add(1, Ordering::SeqCst);
        inner.suggestions.send_modify(|s| s.schemas.clear());
        inner.refresh_tables().await;
    }

    /// Picks a table suggestion: sets the field and closes the list.
    pub fn select_table(&self, table: &str) {
        let inner = &self.inner;
        lock(&inner.typed).table = table.to_string();
        lock(&inner.settled).table = table.to_string();
        inner.table_keystrokes.fetch_add(1, Ordering::SeqCst);
        inner.table_lookups.fetch_add(1, Ordering::SeqCst);
        inner.suggestions.send_modify(|s| s.tables.clear());
    }

    fn schedule(&self, field: Field) {
        let counter = match field {
            Field::Library => &self.inner.library_keystrokes,
            Field::Table => &self.inner.table_keystrokes,
        };
        let keystroke = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let counter = match field {
                Field::Library => &inner.library_keystrokes,
                Field::Table => &inner.table_keystrokes,
            };
            if counter.load(Ordering::SeqCst) != keystroke {
                return;
            }
            match field {
                Field::Library => {
                    let typed = lock(&inner.typed).library.clone();
                    lock(&inner.settled).library = typed;
                    tokio::join!(inner.refresh_schemas(), inner.refresh_tables());
                }
                Field::Table => {
                    let typed = lock(&inner.typed).table.clone();
                    lock(&inner.settled).table = typed;
                    inner.refresh_tables().await;
                }
            }
        });
    }
}

impl Inner {
    async fn refresh_schemas(&self) {
        let Some(token) = self.session.bearer() else {
            return;
        };
        let pattern = lock(&self.settled).library.trim().to_uppercase();
        let lookup = self.schema_lookups.fetch_add(1, Ordering::SeqCst) + 1;

        if pattern.is_empty() {
            self.suggestions.send_if_modified(|s| clear(&mut s.schemas));
            return;
        }

        let key = format!("schemas|{}|{}", fingerprint(&token), pattern);
        let result = self
            .cached(key, async {
                self.api
                    .list_schemas(&format!("{}%", pattern), Some(&token))
                    .await
            })
            .await;

        match result {
            Ok(schemas) if self.schema_lookups.load(Ordering::SeqCst) == lookup => {
                self.suggestions.send_modify(|s| s.schemas = schemas);
            }
            Ok(_) => tracing::debug!("Discarding stale schema suggestions for '{}'", pattern),
            Err(e) => tracing::debug!("Schema lookup for '{}' failed: {}", pattern, e),
        }
    }

    async fn refresh_tables(&self) {
        let Some(token) = self.session.bearer() else {
            return;
        };
        let (library, pattern) = {
            let settled = lock(&self.settled);
            (
                settled.library.trim().to_uppercase(),
                settled.table.trim().to_uppercase(),
            )
        };
        let lookup = self.table_lookups.fetch_add(1, Ordering::SeqCst) + 1;

        if library.is_empty() || pattern.is_empty() {
            self.suggestions.send_if_modified(|s| clear(&mut s.tables));
            return;
        }

        let key = format!("tables|{}|{}|{}", fingerprint(&token), library, pattern);
        let result = self
            .cached(key, async {
                self.api
                    .list_tables(
                        &library,
                        &format!("{}%", pattern),
                        TABLE_SUGGESTION_LIMIT,
                        Some(&token),
                    )
                    .await
            })
            .await;

        match result {
            Ok(tables) if self.table_lookups.load(Ordering::SeqCst) == lookup => {
                self.suggestions.send_modify(|s| s.tables = tables);
            }
            Ok(_) => tracing::debug!("Discarding stale table suggestions for '{}'", pattern),
            Err(e) => tracing::debug!("Table lookup for {}/'{}' failed: {}", library, pattern, e),
        }
    }

    /// Serves from the cache, else runs `fetch` behind the circuit breaker.
    async fn cached<F>(&self, key: String, fetch: F) -> Result<Vec<String>, AppError>
    where
        F: std::future::Future<Output = Result<Vec<String>, AppError>>,
    {
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        let fresh = match self.breaker.call(fetch).await {
            Ok(values) => values,
            Err(failsafe::Error::Inner(e)) => return Err(e),
            Err(failsafe::Error::Rejected) => {
                return Err(AppError::Transport(
                    "catalog lookups paused after repeated failures".to_string(),
                ))
            }
        };
        self.cache.insert(key, fresh.clone()).await;
        Ok(fresh)
    }
}

/// Empties `list`, reporting whether anything was removed.
fn clear(list: &mut Vec<String>) -> bool {
    let had_items = !list.is_empty();
    list.clear();
    had_items
}

fn lock(fields: &Mutex<Fields>) -> std::sync::MutexGuard<'_, Fields> {
    fields.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::TokenStore;

    fn autocomplete(token: Option<&str>) -> CatalogAutocomplete {
        let session = Arc::new(SessionContext::new(TokenStore::in_memory()).unwrap());
        if let Some(token) = token {
            session.login(token).unwrap();
        }
        // Nothing listens on this port; lookups fail and must be swallowed
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        CatalogAutocomplete::with_debounce(api, session, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_select_table_sets_field_and_clears_list() {
        let ac = autocomplete(Some("t"));
        ac.inner
            .suggestions
            .send_modify(|s| s.tables = vec!["QCUSTCDT".into(), "QCUSTX".into()]);

        ac.select_table("QCUSTCDT");
        assert_eq!(ac.table(), "QCUSTCDT");
        assert!(ac.suggestions().tables.is_empty());
    }

    #[tokio::test]
    async fn test_select_schema_sets_field_and_clears_list() {
        let ac = autocomplete(None);
        ac.inner
            .suggestions
            .send_modify(|s| s.schemas = vec!["QIWS".into()]);

        ac.select_schema("QIWS").await;
        assert_eq!(ac.library(), "QIWS");
        assert!(ac.suggestions().schemas.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failures_are_swallowed() {
        let ac = autocomplete(Some("t"));
        ac.set_library("qi");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ac.library(), "qi");
        assert!(ac.suggestions().schemas.is_empty());
    }
}
