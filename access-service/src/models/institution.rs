//! Institution model - tenant identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Institution type filter value that matches every institution.
pub const INSTITUTION_TYPE_ALL: &str = "all";

/// Institution entity. One subscribed plan, one type tag used to filter
/// navigation modules.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Institution {
    pub institution_id: Uuid,
    pub institution_name: String,
    pub institution_type_code: String,
    pub plan_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Institution {
    pub fn type_code(&self) -> &str {
        &self.institution_type_code
    }
}
