//! Permission and role models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Atomic capability identified by a unique key.
///
/// A permission may carry its own route metadata, consumed by the navigation
/// builder when a more specific route exists than the owning feature's
/// default.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub permission_id: Uuid,
    pub permission_key: String,
    pub feature_id: Option<Uuid>,
    pub route_name: Option<String>,
    pub route_title: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Tenant-scoped named bundle of permissions.
///
/// Admin status is an explicit flag on the role, not a name convention.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub institution_id: Uuid,
    pub role_name: String,
    pub role_slug: String,
    pub admin_flag: bool,
    pub created_utc: DateTime<Utc>,
}

/// Role summary returned by the navigation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleSummary {
    pub id: Uuid,
    pub name: String,
}

impl From<Role> for RoleSummary {
    fn from(r: Role) -> Self {
        Self {
            id: r.role_id,
            name: r.role_name,
        }
    }
}
