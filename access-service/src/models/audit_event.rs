//! Audit event model.
//!
//! Rows are append-only: created exclusively by the audit trail service and
//! never updated or deleted afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub institution_id: Option<Uuid>,
    #[schema(example = "auth.login.success")]
    pub action_key: String,
    #[schema(value_type = Object)]
    pub event_data: serde_json::Value,
    #[schema(example = "127.0.0.1")]
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action_key: impl Into<String>,
        actor_user_id: Option<Uuid>,
        institution_id: Option<Uuid>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor_user_id,
            institution_id,
            action_key: action_key.into(),
            event_data,
            ip_address: None,
            user_agent: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_request_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// JSON envelope pushed onto the bounded fallback queue when the durable
/// sink is unavailable. Field names follow the queue's external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEnvelope {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub meta: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl From<&AuditEvent> for FallbackEnvelope {
    fn from(e: &AuditEvent) -> Self {
        Self {
            event: e.action_key.clone(),
            user_id: e.actor_user_id,
            institution_id: e.institution_id,
            ip: e.ip_address.clone(),
            meta: e.event_data.clone(),
            timestamp: e.created_utc,
        }
    }
}
