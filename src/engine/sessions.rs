//! Per-(user, session) engine caching.
//!
//! Reads go straight to a `DashMap`; the creation lock is only taken on a
//! miss, and the map is re-checked under it so each key is built once.
//! Values are `Arc`-cloned out, never held as `DashMap` guards across await.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::ConversationEngine;
use crate::error::KestrelError;

type SessionKey = (String, String);

/// Concurrent cache keyed by user id and session id.
pub struct SessionCache<T> {
    entries: DashMap<SessionKey, Arc<T>>,
    creation: Mutex<()>,
}

impl<T> Default for SessionCache<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            creation: Mutex::new(()),
        }
    }
}

impl<T> SessionCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str, session_id: &str) -> Option<Arc<T>> {
        self.entries
            .get(&key(user_id, session_id))
            .map(|entry| entry.value().clone())
    }

    /// Return the cached value or build it with `create`.
    ///
    /// `create` runs at most once per key even under concurrent callers. A
    /// failed creation caches nothing.
    pub async fn get_or_create<F, Fut>(
        &self,
        user_id: &str,
        session_id: &str,
        create: F,
    ) -> Result<Arc<T>, KestrelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, KestrelError>>,
    {
        if let Some(hit) = self.get(user_id, session_id) {
            return Ok(hit);
        }

        let _guard = self.creation.lock().await;
        if let Some(hit) = self.get(user_id, session_id) {
            return Ok(hit);
        }

        let value = Arc::new(create().await?);
        self.entries
            .insert(key(user_id, session_id), Arc::clone(&value));
        tracing::debug!(user_id, session_id, "Created session entry");
        Ok(value)
    }

    pub fn remove(&self, user_id: &str, session_id: &str) -> Option<Arc<T>> {
        self.entries
            .remove(&key(user_id, session_id))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn key(user_id: &str, session_id: &str) -> SessionKey {
    (user_id.to_string(), session_id.to_string())
}

type EngineFactory =
    dyn Fn(&str, &str) -> Result<ConversationEngine, KestrelError> + Send + Sync;

/// One conversation engine per (user, session), built on first use.
pub struct EnginePool {
    cache: SessionCache<ConversationEngine>,
    factory: Box<EngineFactory>,
}

impl EnginePool {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str, &str) -> Result<ConversationEngine, KestrelError> + Send + Sync + 'static,
    {
        Self {
            cache: SessionCache::new(),
            factory: Box::new(factory),
        }
    }

    pub async fn engine(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Arc<ConversationEngine>, KestrelError> {
        self.cache
            .get_or_create(user_id, session_id, || async {
                (self.factory)(user_id, session_id)
            })
            .await
    }

    /// Drop a session so the next request starts fresh.
    pub fn end_session(&self, user_id: &str, session_id: &str) -> bool {
        self.cache.remove(user_id, session_id).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.cache.len()
    }
}
