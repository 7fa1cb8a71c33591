//! Plan model - the commercial bundle of modules and permissions an
//! institution is licensed to use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub active_flag: bool,
    pub created_utc: DateTime<Utc>,
}
