//! Audit trail service.
//!
//! Every security-relevant action is recorded best-effort: the durable
//! per-tenant sink is tried first, and on failure the event is pushed onto a
//! bounded Redis fallback queue so an outage degrades to delayed ingestion
//! instead of silent loss. Audit failures never fail the caller's request.

use serde_json::json;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AuditEvent, FallbackEnvelope};
use crate::services::redis::FallbackStore;
use crate::services::Database;
use async_trait::async_trait;

// ==================== Action Keys ====================

pub const ACTION_LOGIN_SUCCESS: &str = "auth.login.success";
pub const ACTION_LOGIN_FAILURE: &str = "auth.login.failure";
pub const ACTION_LOCKOUT_TRIGGERED: &str = "auth.lockout.triggered";
pub const ACTION_MFA_EVENT: &str = "auth.mfa.event";
pub const ACTION_SESSION_REVOKED: &str = "auth.session.revoked";
pub const ACTION_PASSWORD_CHANGED: &str = "auth.password.changed";
pub const ACTION_NEW_DEVICE_LOGIN: &str = "auth.device.new_login";
pub const ACTION_PERMISSION_DENIED: &str = "access.permission.denied";

// ==================== Schema Validation ====================

const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Whether `schema` is a safe tenant schema identifier: lowercase ASCII
/// letters, digits and underscores, not starting with a digit, and within
/// Postgres's identifier length limit. Schema names reach SQL text by
/// interpolation, so anything else is rejected before it gets near a query.
pub fn is_valid_schema_name(schema: &str) -> bool {
    if schema.is_empty() || schema.len() > MAX_SCHEMA_NAME_LEN {
        return false;
    }
    let mut chars = schema.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ==================== Durable Sink ====================

/// Durable, tenant-scoped audit sink, implemented by [`Database`].
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, schema: &str, event: &AuditEvent) -> Result<(), AppError>;
    async fn recent(&self, schema: &str, limit: i64) -> Result<Vec<AuditEvent>, AppError>;
    async fn for_institution(
        &self,
        schema: &str,
        institution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AppError>;
}

#[async_trait]
impl AuditStore for Database {
    async fn append(&self, schema: &str, event: &AuditEvent) -> Result<(), AppError> {
        self.insert_audit_event(schema, event).await
    }

    async fn recent(&self, schema: &str, limit: i64) -> Result<Vec<AuditEvent>, AppError> {
        self.recent_audit_events(schema, limit).await
    }

    async fn for_institution(
        &self,
        schema: &str,
        institution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AppError> {
        self.institution_audit_events(schema, institution_id, limit)
            .await
    }
}

// ==================== Audit Trail ====================

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    fallback: Arc<dyn FallbackStore>,
    queue_key: String,
    queue_limit: i64,
}

impl AuditTrail {
    pub fn new(
        store: Arc<dyn AuditStore>,
        fallback: Arc<dyn FallbackStore>,
        queue_key: String,
        queue_limit: i64,
    ) -> Self {
        Self {
            store,
            fallback,
            queue_key,
            queue_limit,
        }
    }

    /// Write one event, preferring the durable sink.
    ///
    /// An invalid tenant schema never reaches the sink; the event goes
    /// straight to the fallback queue. If the fallback also fails the event
    /// is lost and the loss is logged.
    pub async fn log(&self, schema: &str, event: AuditEvent) {
        if is_valid_schema_name(schema) {
            match self.store.append(schema, &event).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        action = %event.action_key,
                        error = %e,
                        "Audit sink write failed; queueing to fallback"
                    );
                }
            }
        } else {
            tracing::warn!(
                schema = %schema,
                action = %event.action_key,
                "Invalid tenant schema for audit write; queueing to fallback"
            );
        }

        self.push_fallback(&event).await;
    }

    async fn push_fallback(&self, event: &AuditEvent) {
        let envelope = FallbackEnvelope::from(event);
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    action = %event.action_key,
                    error = %e,
                    "Audit event could not be serialized; event lost"
                );
                return;
            }
        };

        if let Err(e) = self
            .fallback
            .push_trimmed(&self.queue_key, &payload, self.queue_limit)
            .await
        {
            tracing::error!(
                action = %event.action_key,
                error = %e,
                "Audit fallback queue unavailable; event lost"
            );
        }
    }

    /// Fire-and-forget variant for request paths that must not wait on audit
    /// I/O.
    pub fn record(&self, schema: String, event: AuditEvent) {
        let trail = self.clone();
        tokio::spawn(async move {
            trail.log(&schema, event).await;
        });
    }

    // ==================== Read Side ====================

    /// Most recent events for a tenant, newest first. Best-effort: read
    /// failures degrade to an empty list.
    pub async fn recent_events(&self, schema: &str, limit: i64) -> Vec<AuditEvent> {
        if !is_valid_schema_name(schema) {
            return Vec::new();
        }
        match self.store.recent(schema, limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read recent audit events");
                Vec::new()
            }
        }
    }

    pub async fn institution_events(
        &self,
        schema: &str,
        institution_id: Uuid,
        limit: i64,
    ) -> Vec<AuditEvent> {
        if !is_valid_schema_name(schema) {
            return Vec::new();
        }
        match self.store.for_institution(schema, institution_id, limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read institution audit events");
                Vec::new()
            }
        }
    }

    // ==================== Helpers ====================

    pub async fn login_success(
        &self,
        schema: &str,
        user_id: Uuid,
        institution_id: Option<Uuid>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) {
        let event = AuditEvent::new(ACTION_LOGIN_SUCCESS, Some(user_id), institution_id, json!({}))
            .with_request_info(ip, user_agent);
        self.log(schema, event).await;
    }

    pub async fn login_failure(
        &self,
        schema: &str,
        identifier: &str,
        reason: &str,
        ip: Option<String>,
    ) {
        let event = AuditEvent::new(
            ACTION_LOGIN_FAILURE,
            None,
            None,
            json!({ "identifier": identifier, "reason": reason }),
        )
        .with_request_info(ip, None);
        self.log(schema, event).await;
    }

    pub async fn lockout_triggered(&self, schema: &str, user_id: Uuid, failed_attempts: u32) {
        let event = AuditEvent::new(
            ACTION_LOCKOUT_TRIGGERED,
            Some(user_id),
            None,
            json!({ "failedAttempts": failed_attempts }),
        );
        self.log(schema, event).await;
    }

    pub async fn mfa_event(&self, schema: &str, user_id: Uuid, outcome: &str) {
        let event = AuditEvent::new(
            ACTION_MFA_EVENT,
            Some(user_id),
            None,
            json!({ "outcome": outcome }),
        );
        self.log(schema, event).await;
    }

    pub async fn session_revoked(&self, schema: &str, user_id: Uuid, session_id: Uuid) {
        let event = AuditEvent::new(
            ACTION_SESSION_REVOKED,
            Some(user_id),
            None,
            json!({ "sessionId": session_id }),
        );
        self.log(schema, event).await;
    }

    pub async fn password_changed(&self, schema: &str, user_id: Uuid, ip: Option<String>) {
        let event = AuditEvent::new(ACTION_PASSWORD_CHANGED, Some(user_id), None, json!({}))
            .with_request_info(ip, None);
        self.log(schema, event).await;
    }

    pub async fn new_device_login(
        &self,
        schema: &str,
        user_id: Uuid,
        ip: Option<String>,
        user_agent: Option<String>,
    ) {
        let event = AuditEvent::new(ACTION_NEW_DEVICE_LOGIN, Some(user_id), None, json!({}))
            .with_request_info(ip, user_agent);
        self.log(schema, event).await;
    }

    pub async fn permission_denied(
        &self,
        schema: &str,
        user_id: Uuid,
        institution_id: Option<Uuid>,
        permission_key: &str,
    ) {
        let event = AuditEvent::new(
            ACTION_PERMISSION_DENIED,
            Some(user_id),
            institution_id,
            json!({ "permissionKey": permission_key }),
        );
        self.log(schema, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::redis::MockFallbackStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_schema_name_validation() {
        assert!(is_valid_schema_name("tenant_greenfield"));
        assert!(is_valid_schema_name("_staging"));
        assert!(is_valid_schema_name("t1"));

        assert!(!is_valid_schema_name(""));
        assert!(!is_valid_schema_name("1tenant"));
        assert!(!is_valid_schema_name("Tenant"));
        assert!(!is_valid_schema_name("tenant-a"));
        assert!(!is_valid_schema_name("tenant a"));
        assert!(!is_valid_schema_name("tenant;drop table users"));
        assert!(!is_valid_schema_name(&"a".repeat(64)));
        assert!(is_valid_schema_name(&"a".repeat(63)));
    }

    struct RecordingStore {
        appended: Mutex<Vec<(String, AuditEvent)>>,
        fail_appends: bool,
        append_calls: AtomicUsize,
    }

    impl RecordingStore {
        fn new(fail_appends: bool) -> Self {
            Self {
                appended: Mutex::new(Vec::new()),
                fail_appends,
                append_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuditStore for RecordingStore {
        async fn append(&self, schema: &str, event: &AuditEvent) -> Result<(), AppError> {
            self.append_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_appends {
                return Err(AppError::DatabaseError(anyhow::anyhow!("sink down")));
            }
            self.appended
                .lock()
                .unwrap()
                .push((schema.to_string(), event.clone()));
            Ok(())
        }

        async fn recent(&self, _schema: &str, _limit: i64) -> Result<Vec<AuditEvent>, AppError> {
            Err(AppError::DatabaseError(anyhow::anyhow!("sink down")))
        }

        async fn for_institution(
            &self,
            _schema: &str,
            _institution_id: Uuid,
            _limit: i64,
        ) -> Result<Vec<AuditEvent>, AppError> {
            Err(AppError::DatabaseError(anyhow::anyhow!("sink down")))
        }
    }

    fn trail(store: Arc<RecordingStore>, fallback: Arc<MockFallbackStore>) -> AuditTrail {
        AuditTrail::new(store, fallback, "audit:fallback".to_string(), 10_000)
    }

    #[tokio::test]
    async fn test_healthy_sink_receives_the_event() {
        let store = Arc::new(RecordingStore::new(false));
        let fallback = Arc::new(MockFallbackStore::new());
        let trail = trail(store.clone(), fallback.clone());

        trail
            .log(
                "tenant_a",
                AuditEvent::new(ACTION_LOGIN_SUCCESS, Some(Uuid::new_v4()), None, json!({})),
            )
            .await;

        assert_eq!(store.appended.lock().unwrap().len(), 1);
        assert_eq!(fallback.queue_len("audit:fallback").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sink_failure_falls_back_to_queue() {
        let store = Arc::new(RecordingStore::new(true));
        let fallback = Arc::new(MockFallbackStore::new());
        let trail = trail(store, fallback.clone());

        trail
            .log(
                "tenant_a",
                AuditEvent::new(
                    ACTION_LOGIN_FAILURE,
                    None,
                    None,
                    json!({ "reason": "bad_password" }),
                ),
            )
            .await;

        assert_eq!(fallback.queue_len("audit:fallback").await.unwrap(), 1);

        let queues = fallback.queues.lock().unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(&queues.get("audit:fallback").unwrap()[0]).unwrap();
        assert_eq!(payload["event"], ACTION_LOGIN_FAILURE);
        assert_eq!(payload["meta"]["reason"], "bad_password");
    }

    #[tokio::test]
    async fn test_invalid_schema_never_touches_the_sink() {
        let store = Arc::new(RecordingStore::new(false));
        let fallback = Arc::new(MockFallbackStore::new());
        let trail = trail(store.clone(), fallback.clone());

        trail
            .log(
                "tenant;drop",
                AuditEvent::new(ACTION_PASSWORD_CHANGED, Some(Uuid::new_v4()), None, json!({})),
            )
            .await;

        assert_eq!(store.append_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fallback.queue_len("audit:fallback").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reads_degrade_to_empty_on_failure() {
        let store = Arc::new(RecordingStore::new(true));
        let fallback = Arc::new(MockFallbackStore::new());
        let trail = trail(store, fallback);

        assert!(trail.recent_events("tenant_a", 50).await.is_empty());
        assert!(trail
            .institution_events("tenant_a", Uuid::new_v4(), 50)
            .await
            .is_empty());
        assert!(trail.recent_events("Bad Schema", 50).await.is_empty());
    }
}
