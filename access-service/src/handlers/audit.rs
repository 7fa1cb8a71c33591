//! Audit read endpoints.
//!
//! Reads are gated by the `security.audit:view` permission through the same
//! authorization decision the navigation uses. A refusal is itself an
//! auditable event.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::RequestContext;
use crate::models::AuditEvent;
use crate::services::permissions::{is_authorized, PermissionAggregator};
use crate::AppState;

pub const AUDIT_VIEW_PERMISSION: &str = "security.audit:view";

const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct AuditQuery {
    /// Maximum number of events to return.
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEventsResponse {
    pub events: Vec<AuditEvent>,
}

/// Authorize the caller for audit reads, recording refusals.
async fn authorize_audit_read(
    state: &AppState,
    context: &RequestContext,
) -> Result<(), AppError> {
    let plan = state.plan_resolver.resolve(context.institution_id).await?;
    let roles = state.aggregator.roles(context.user_id).await;
    let is_admin = PermissionAggregator::is_admin(&roles);
    let effective = state
        .aggregator
        .effective_permissions(context.user_id, &plan.permission_keys)
        .await;

    if is_authorized(
        AUDIT_VIEW_PERMISSION,
        &effective,
        is_admin,
        &plan.permission_keys,
    ) {
        return Ok(());
    }

    if let Some(schema) = &context.tenant_schema {
        state
            .audit
            .permission_denied(
                schema,
                context.user_id,
                context.institution_id,
                AUDIT_VIEW_PERMISSION,
            )
            .await;
    }

    Err(AppError::Forbidden(anyhow::anyhow!(
        "Not permitted to view the audit trail"
    )))
}

/// Most recent audit events for the caller's tenant.
#[utoipa::path(
    get,
    path = "/audit/recent",
    tag = "audit",
    params(AuditQuery),
    responses(
        (status = 200, description = "Recent audit events", body = AuditEventsResponse),
        (status = 403, description = "Caller lacks the audit view permission"),
    )
)]
pub async fn get_recent_events(
    State(state): State<AppState>,
    context: RequestContext,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditEventsResponse>, AppError> {
    query.validate()?;
    authorize_audit_read(&state, &context).await?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let events = match &context.tenant_schema {
        Some(schema) => state.audit.recent_events(schema, limit).await,
        None => Vec::new(),
    };

    Ok(Json(AuditEventsResponse { events }))
}

/// Audit events scoped to one institution.
#[utoipa::path(
    get,
    path = "/audit/institution/{institution_id}",
    tag = "audit",
    params(
        ("institution_id" = Uuid, Path, description = "Institution to filter by"),
        AuditQuery,
    ),
    responses(
        (status = 200, description = "Institution audit events", body = AuditEventsResponse),
        (status = 403, description = "Caller lacks the audit view permission"),
    )
)]
pub async fn get_institution_events(
    State(state): State<AppState>,
    context: RequestContext,
    Path(institution_id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditEventsResponse>, AppError> {
    query.validate()?;
    authorize_audit_read(&state, &context).await?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let events = match &context.tenant_schema {
        Some(schema) => {
            state
                .audit
                .institution_events(schema, institution_id, limit)
                .await
        }
        None => Vec::new(),
    };

    Ok(Json(AuditEventsResponse { events }))
}
