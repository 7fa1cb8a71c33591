//! Academic session middleware.
//!
//! Runs after request context extraction and fills in the academic session
//! id: an explicit, well-formed `X-Academic-Session-ID` header wins;
//! otherwise the institution's current session is resolved through the TTL
//! cache. A malformed header is ignored rather than rejected, and having no
//! session at all is a normal state.

use axum::{
    extract::{Request, State},
    http::header::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::middleware::context::RequestContext;
use crate::AppState;

pub const ACADEMIC_SESSION_HEADER: &str = "x-academic-session-id";

/// Extract the session override header when it carries a valid UUID.
pub fn session_override(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(ACADEMIC_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}

pub async fn academic_session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let override_id = session_override(request.headers());

    if let Some(context) = request.extensions().get::<RequestContext>().cloned() {
        let academic_session_id = state
            .sessions
            .resolve(context.institution_id, override_id)
            .await;
        request.extensions_mut().insert(RequestContext {
            academic_session_id,
            ..context
        });
    }

    next.run(request).await
}
