//! Request context endpoint, mainly useful for integration smoke tests and
//! for clients that need to confirm what identity the gateway forwarded.

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::middleware::RequestContext;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_session_id: Option<Uuid>,
}

/// The resolved identity, tenancy and academic session of this request.
#[utoipa::path(
    get,
    path = "/context",
    tag = "context",
    responses(
        (status = 200, description = "Resolved request context", body = ContextResponse),
        (status = 401, description = "Missing user identity"),
    )
)]
pub async fn get_context(context: RequestContext) -> Json<ContextResponse> {
    Json(ContextResponse {
        user_id: context.user_id,
        institution_id: context.institution_id,
        tenant_schema: context.tenant_schema,
        academic_session_id: context.academic_session_id,
    })
}
