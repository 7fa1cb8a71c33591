use access_service::{
    build_router,
    config::AccessConfig,
    services::{
        AuditTrail, Database, PermissionAggregator, PlanAccessCache, PlanAccessResolver,
        RedisService, SessionCache, SessionResolver,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        &config.common.otlp_endpoint,
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting access service"
    );

    // Initialize database connections
    tracing::info!("Initializing database connections");
    let pool = access_service::db::create_pool(&config.database).await?;
    access_service::db::run_migrations(&pool).await.map_err(|e| {
        service_core::error::AppError::DatabaseError(anyhow::anyhow!(e))
    })?;
    let db = Database::new(pool);
    tracing::info!("Database initialized successfully");

    // Initialize Redis-backed fallback store
    let redis = RedisService::new(&config.redis).await.map_err(|e| {
        service_core::error::AppError::ConfigError(anyhow::anyhow!(e))
    })?;
    let fallback = Arc::new(redis);
    tracing::info!("Redis service initialized");

    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiter initialized: Global IP");

    // Initialize services
    let db_arc = Arc::new(db.clone());
    let plan_resolver = PlanAccessResolver::new(
        db_arc.clone(),
        Arc::new(PlanAccessCache::new(Duration::from_secs(
            config.cache.plan_ttl_seconds,
        ))),
    );
    let aggregator = PermissionAggregator::new(db_arc.clone());
    let sessions = SessionResolver::new(
        db_arc.clone(),
        Arc::new(SessionCache::new(Duration::from_secs(
            config.cache.session_ttl_seconds,
        ))),
    );
    let audit = AuditTrail::new(
        db_arc,
        fallback.clone(),
        config.audit.fallback_queue_key.clone(),
        config.audit.fallback_queue_limit,
    );

    // Create application state
    let state = AppState {
        config: config.clone(),
        db,
        fallback,
        plan_resolver,
        aggregator,
        sessions,
        audit,
        ip_rate_limiter,
    };

    // Build application router
    let app = build_router(state).await?;

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Give in-flight requests 30 seconds to complete
    tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
}
