//! PostgreSQL database service for access-service.
//!
//! Configuration data (institutions, plans, modules, features, permissions)
//! is provisioned by external flows; everything here except the audit insert
//! is read-only.

use service_core::error::AppError;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{AcademicSession, AuditEvent, Feature, Institution, Module, Permission, Plan, Role};
use crate::services::audit::is_valid_schema_name;

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== Institution / Plan Operations ====================

    /// Find institution by ID.
    pub async fn find_institution_by_id(
        &self,
        institution_id: Uuid,
    ) -> Result<Option<Institution>, AppError> {
        sqlx::query_as::<_, Institution>(
            "SELECT * FROM institutions WHERE institution_id = $1",
        )
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find the institution's subscribed plan, active plans only.
    pub async fn find_active_plan_for_institution(
        &self,
        institution_id: Uuid,
    ) -> Result<Option<Plan>, AppError> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT p.* FROM plans p
            JOIN institutions i ON i.plan_id = p.plan_id
            WHERE i.institution_id = $1 AND p.active_flag = true
            "#,
        )
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Module ids directly granted by a plan.
    pub async fn plan_module_ids(&self, plan_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT module_id FROM plan_modules WHERE plan_id = $1")
                .bind(plan_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Permission keys directly granted by a plan.
    pub async fn plan_permission_keys(&self, plan_id: Uuid) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT pm.permission_key FROM permissions pm
            JOIN plan_permissions pp ON pm.permission_id = pp.permission_id
            WHERE pp.plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    // ==================== Module / Feature Operations ====================

    /// Load every module's (id, parent id) edge for the in-memory graph.
    pub async fn module_edges(&self) -> Result<Vec<(Uuid, Option<Uuid>)>, AppError> {
        sqlx::query_as::<_, (Uuid, Option<Uuid>)>(
            "SELECT module_id, parent_module_id FROM modules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Load modules by id, ordered for navigation assembly.
    pub async fn find_modules_by_ids(&self, module_ids: &[Uuid]) -> Result<Vec<Module>, AppError> {
        sqlx::query_as::<_, Module>(
            r#"
            SELECT * FROM modules
            WHERE module_id = ANY($1)
            ORDER BY sort_order, module_title
            "#,
        )
        .bind(module_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Load features owned by the given modules, ordered for assembly.
    pub async fn find_features_for_modules(
        &self,
        module_ids: &[Uuid],
    ) -> Result<Vec<Feature>, AppError> {
        sqlx::query_as::<_, Feature>(
            r#"
            SELECT * FROM features
            WHERE module_id = ANY($1)
            ORDER BY sort_order, feature_title
            "#,
        )
        .bind(module_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Load permissions owned by the given features.
    pub async fn find_permissions_for_features(
        &self,
        feature_ids: &[Uuid],
    ) -> Result<Vec<Permission>, AppError> {
        sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE feature_id = ANY($1)",
        )
        .bind(feature_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Permission keys licensed transitively via feature ownership by the
    /// given modules.
    pub async fn permission_keys_for_modules(
        &self,
        module_ids: &[Uuid],
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT pm.permission_key FROM permissions pm
            JOIN features f ON pm.feature_id = f.feature_id
            WHERE f.module_id = ANY($1)
            "#,
        )
        .bind(module_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    // ==================== User Grant Operations ====================

    /// Roles held by a user.
    pub async fn find_roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>, AppError> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT r.* FROM roles r
            JOIN user_roles ur ON r.role_id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.role_name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Permission keys granted through the user's role memberships.
    pub async fn role_permission_keys_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT pm.permission_key FROM permissions pm
            JOIN role_permissions rp ON pm.permission_id = rp.permission_id
            JOIN user_roles ur ON rp.role_id = ur.role_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    /// Direct user permission grants.
    pub async fn direct_permission_keys_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT pm.permission_key FROM permissions pm
            JOIN user_permissions up ON pm.permission_id = up.permission_id
            WHERE up.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    /// Delegated admin permission grants.
    pub async fn admin_permission_keys_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT pm.permission_key FROM permissions pm
            JOIN admin_permissions ap ON pm.permission_id = ap.permission_id
            WHERE ap.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    // ==================== Academic Session Operations ====================

    /// The institution's current academic session, if one is flagged.
    pub async fn find_current_session(
        &self,
        institution_id: Uuid,
    ) -> Result<Option<AcademicSession>, AppError> {
        sqlx::query_as::<_, AcademicSession>(
            r#"
            SELECT * FROM academic_sessions
            WHERE institution_id = $1 AND current_flag = true
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    // ==================== Audit Operations ====================

    /// Insert an audit event into the tenant schema's append-only table.
    ///
    /// The schema name is interpolated into the statement, so it MUST have
    /// passed `is_valid_schema_name`; this is re-checked here as the last
    /// line of the isolation rule.
    pub async fn insert_audit_event(
        &self,
        schema: &str,
        event: &AuditEvent,
    ) -> Result<(), AppError> {
        if !is_valid_schema_name(schema) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid tenant schema name"
            )));
        }

        let query = format!(
            r#"
            INSERT INTO {}.audit_events
                (event_id, actor_user_id, institution_id, action_key, event_data, ip_address, user_agent, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            schema
        );

        sqlx::query(&query)
            .bind(event.event_id)
            .bind(event.actor_user_id)
            .bind(event.institution_id)
            .bind(&event.action_key)
            .bind(&event.event_data)
            .bind(&event.ip_address)
            .bind(&event.user_agent)
            .bind(event.created_utc)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Most recent audit events in a tenant schema.
    pub async fn recent_audit_events(
        &self,
        schema: &str,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AppError> {
        if !is_valid_schema_name(schema) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid tenant schema name"
            )));
        }

        let query = format!(
            "SELECT * FROM {}.audit_events ORDER BY created_utc DESC LIMIT $1",
            schema
        );

        sqlx::query_as::<_, AuditEvent>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Most recent audit events for one institution in a tenant schema.
    pub async fn institution_audit_events(
        &self,
        schema: &str,
        institution_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AppError> {
        if !is_valid_schema_name(schema) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invalid tenant schema name"
            )));
        }

        let query = format!(
            r#"
            SELECT * FROM {}.audit_events
            WHERE institution_id = $1
            ORDER BY created_utc DESC
            LIMIT $2
            "#,
            schema
        );

        sqlx::query_as::<_, AuditEvent>(&query)
            .bind(institution_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }
}
