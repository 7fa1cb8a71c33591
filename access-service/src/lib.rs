pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AccessConfig;
use crate::services::{
    AuditTrail, Database, FallbackStore, PermissionAggregator, PlanAccessResolver, SessionResolver,
};
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::navigation::get_navigation,
        handlers::navigation::get_permissions,
        handlers::navigation::get_nav_items,
        handlers::context::get_context,
        handlers::audit::get_recent_events,
        handlers::audit::get_institution_events,
    ),
    components(
        schemas(
            handlers::navigation::NavigationResponse,
            handlers::navigation::PermissionsResponse,
            handlers::navigation::NavItemsResponse,
            handlers::context::ContextResponse,
            handlers::audit::AuditEventsResponse,
            services::navigation::NavNode,
            models::RoleSummary,
            models::AuditEvent,
        )
    ),
    tags(
        (name = "navigation", description = "Permission-aware navigation composition"),
        (name = "context", description = "Resolved request context"),
        (name = "audit", description = "Security audit trail"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub db: Database,
    pub fallback: Arc<dyn FallbackStore>,
    pub plan_resolver: PlanAccessResolver,
    pub aggregator: PermissionAggregator,
    pub sessions: SessionResolver,
    pub audit: AuditTrail,
    pub ip_rate_limiter: IpRateLimiter,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Everything behind the gateway identity headers.
    let protected = Router::new()
        .route("/navigation", get(handlers::navigation::get_navigation))
        .route(
            "/navigation/permissions",
            get(handlers::navigation::get_permissions),
        )
        .route(
            "/navigation/nav-items",
            get(handlers::navigation::get_nav_items),
        )
        .route("/context", get(handlers::context::get_context))
        .route("/audit/recent", get(handlers::audit::get_recent_events))
        .route(
            "/audit/institution/:institution_id",
            get(handlers::audit::get_institution_events),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::academic_session_middleware,
        ))
        .layer(from_fn(middleware::request_context_middleware));

    let mut app = Router::new().route("/health", get(health_check));

    let swagger_enabled = match state.config.environment {
        crate::config::Environment::Dev => true,
        crate::config::Environment::Prod => match state.config.swagger.enabled {
            crate::config::SwaggerMode::Public | crate::config::SwaggerMode::Authenticated => true,
            crate::config::SwaggerMode::Disabled => false,
        },
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let ip_limiter = state.ip_rate_limiter.clone();

    let app = app
        .merge(protected)
        .with_state(state.clone())
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .map(|o| {
                            o.parse::<axum::http::HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    o,
                                    e
                                );
                                axum::http::HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::HeaderName::from_static("x-user-id"),
                    axum::http::header::HeaderName::from_static("x-institution-id"),
                    axum::http::header::HeaderName::from_static("x-tenant-schema"),
                    axum::http::header::HeaderName::from_static("x-academic-session-id"),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        e
    })?;

    state.fallback.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Redis health check failed");
        AppError::InternalError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up",
            "redis": "up"
        }
    })))
}
