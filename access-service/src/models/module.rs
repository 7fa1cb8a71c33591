//! Module and feature models.
//!
//! Modules form a forest via `parent_module_id` and group features; features
//! are leaf capability groups carrying route metadata and owning permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub module_id: Uuid,
    pub parent_module_id: Option<Uuid>,
    pub module_slug: String,
    pub module_title: String,
    pub icon_name: Option<String>,
    pub sort_order: i32,
    /// `None` or `"all"` matches every institution type.
    pub institution_type_code: Option<String>,
    pub route_name: Option<String>,
    pub route_title: Option<String>,
    pub route_active_flag: Option<bool>,
    pub created_utc: DateTime<Utc>,
}

impl Module {
    /// Whether this module is visible to an institution of the given type.
    pub fn matches_institution_type(&self, institution_type: &str) -> bool {
        match self.institution_type_code.as_deref() {
            None => true,
            Some(code) => code == super::institution::INSTITUTION_TYPE_ALL
                || code == institution_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feature {
    pub feature_id: Uuid,
    pub module_id: Uuid,
    pub feature_slug: String,
    pub feature_title: String,
    pub sort_order: i32,
    pub route_name: Option<String>,
    pub route_title: Option<String>,
    pub route_active_flag: Option<bool>,
    pub created_utc: DateTime<Utc>,
}
