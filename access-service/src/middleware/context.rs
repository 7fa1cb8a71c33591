//! Request context extraction.
//!
//! The tenant gateway authenticates upstream and forwards identity as
//! headers; this service trusts them. A request without a user id has no
//! business here and is rejected before any handler runs.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header::HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const INSTITUTION_ID_HEADER: &str = "x-institution-id";
pub const TENANT_SCHEMA_HEADER: &str = "x-tenant-schema";

/// Identity and tenancy of the current request, attached as an extension.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub institution_id: Option<Uuid>,
    pub tenant_schema: Option<String>,
    /// Populated by the session middleware, which runs after this one.
    pub academic_session_id: Option<Uuid>,
}

/// Parse an optional UUID header. Present but malformed is an error; absent
/// is `None`.
pub fn parse_uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} header is not valid text", name)))?;
    let id = Uuid::parse_str(text)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} header is not a valid id", name)))?;
    Ok(Some(id))
}

pub fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, AppError> {
    let user_id = parse_uuid_header(headers, USER_ID_HEADER)?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing user identity")))?;

    let institution_id = parse_uuid_header(headers, INSTITUTION_ID_HEADER)?;

    let tenant_schema = headers
        .get(TENANT_SCHEMA_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    Ok(RequestContext {
        user_id,
        institution_id,
        tenant_schema,
        academic_session_id: None,
    })
}

pub async fn request_context_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = context_from_headers(request.headers())?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing request context")))
    }
}
