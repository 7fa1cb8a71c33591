//! Academic session model.
//!
//! Exactly one session per institution should carry `current_flag` at any
//! time. That is a soft invariant maintained by session-management flows;
//! this service trusts the flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AcademicSession {
    pub session_id: Uuid,
    pub institution_id: Uuid,
    pub session_label: String,
    pub current_flag: bool,
    pub created_utc: DateTime<Utc>,
}
