//! Academic session resolution.
//!
//! Each institution has at most one current academic session. Requests may
//! pin a session explicitly via header; otherwise the current session is
//! looked up through a small TTL cache so the common path stays off the
//! database. Resolution is best-effort: no session is a normal state, not an
//! error.

use async_trait::async_trait;
use dashmap::DashMap;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::AcademicSession;
use crate::services::Database;

/// Source of the current academic session, implemented by [`Database`].
#[async_trait]
pub trait CurrentSessionSource: Send + Sync {
    async fn current_session(
        &self,
        institution_id: Uuid,
    ) -> Result<Option<AcademicSession>, AppError>;
}

#[async_trait]
impl CurrentSessionSource for Database {
    async fn current_session(
        &self,
        institution_id: Uuid,
    ) -> Result<Option<AcademicSession>, AppError> {
        self.find_current_session(institution_id).await
    }
}

/// TTL cache of current session ids, keyed by institution.
///
/// Entries are read and written without holding any lock across I/O; the
/// resolver queries first and inserts after.
pub struct SessionCache {
    entries: DashMap<Uuid, (Uuid, Instant)>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, institution_id: Uuid) -> Option<Uuid> {
        if let Some(entry) = self.entries.get(&institution_id) {
            let (session_id, inserted_at) = *entry.value();
            if inserted_at.elapsed() < self.ttl {
                return Some(session_id);
            }
        }
        self.entries.remove(&institution_id);
        None
    }

    pub fn insert(&self, institution_id: Uuid, session_id: Uuid) {
        self.entries
            .insert(institution_id, (session_id, Instant::now()));
    }

    pub fn invalidate(&self, institution_id: Uuid) {
        self.entries.remove(&institution_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[derive(Clone)]
pub struct SessionResolver {
    source: Arc<dyn CurrentSessionSource>,
    cache: Arc<SessionCache>,
}

impl SessionResolver {
    pub fn new(source: Arc<dyn CurrentSessionSource>, cache: Arc<SessionCache>) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Resolve the academic session id for a request.
    ///
    /// A valid header override wins and is never cached (it is the caller's
    /// choice, not the institution's state). Otherwise the cache is
    /// consulted, then the database. Lookup failures degrade to `None`.
    pub async fn resolve(
        &self,
        institution_id: Option<Uuid>,
        header_override: Option<Uuid>,
    ) -> Option<Uuid> {
        if let Some(session_id) = header_override {
            return Some(session_id);
        }

        let institution_id = institution_id?;

        if let Some(session_id) = self.cache.get(institution_id) {
            return Some(session_id);
        }

        match self.source.current_session(institution_id).await {
            Ok(Some(session)) => {
                self.cache.insert(institution_id, session.session_id);
                Some(session.session_id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(%institution_id, error = %e, "Failed to resolve current academic session");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSessionSource {
        session_id: Option<Uuid>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticSessionSource {
        fn with_session(session_id: Uuid) -> Self {
            Self {
                session_id: Some(session_id),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CurrentSessionSource for StaticSessionSource {
        async fn current_session(
            &self,
            institution_id: Uuid,
        ) -> Result<Option<AcademicSession>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::DatabaseError(anyhow::anyhow!("boom")));
            }
            Ok(self.session_id.map(|session_id| AcademicSession {
                session_id,
                institution_id,
                session_label: "2026-27".to_string(),
                current_flag: true,
                created_utc: Utc::now(),
            }))
        }
    }

    fn resolver(source: Arc<StaticSessionSource>) -> SessionResolver {
        SessionResolver::new(source, Arc::new(SessionCache::new(Duration::from_secs(300))))
    }

    #[tokio::test]
    async fn test_header_override_wins_and_is_not_cached() {
        let source = Arc::new(StaticSessionSource::with_session(Uuid::new_v4()));
        let resolver = resolver(source.clone());
        let institution_id = Uuid::new_v4();
        let pinned = Uuid::new_v4();

        let resolved = resolver.resolve(Some(institution_id), Some(pinned)).await;
        assert_eq!(resolved, Some(pinned));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(resolver.cache().get(institution_id).is_none());
    }

    #[tokio::test]
    async fn test_cache_populated_on_miss_then_served_from_cache() {
        let current = Uuid::new_v4();
        let source = Arc::new(StaticSessionSource::with_session(current));
        let resolver = resolver(source.clone());
        let institution_id = Uuid::new_v4();

        assert_eq!(
            resolver.resolve(Some(institution_id), None).await,
            Some(current)
        );
        assert_eq!(
            resolver.resolve(Some(institution_id), None).await,
            Some(current)
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        resolver.cache().invalidate(institution_id);
        resolver.resolve(Some(institution_id), None).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted() {
        let cache = SessionCache::new(Duration::from_secs(0));
        let institution_id = Uuid::new_v4();
        cache.insert(institution_id, Uuid::new_v4());
        assert!(cache.get(institution_id).is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_none() {
        let source = Arc::new(StaticSessionSource {
            session_id: None,
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(source);
        assert_eq!(resolver.resolve(Some(Uuid::new_v4()), None).await, None);
    }

    #[tokio::test]
    async fn test_no_institution_resolves_to_none() {
        let source = Arc::new(StaticSessionSource::with_session(Uuid::new_v4()));
        let resolver = resolver(source);
        assert_eq!(resolver.resolve(None, None).await, None);
    }
}
