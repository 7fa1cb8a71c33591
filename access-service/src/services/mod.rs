pub mod audit;
pub mod database;
pub mod navigation;
pub mod permissions;
pub mod plan_access;
pub mod redis;
pub mod session_cache;

pub use audit::{is_valid_schema_name, AuditStore, AuditTrail};
pub use database::Database;
pub use navigation::{build_navigation, is_generic_grouping_title, NavNode};
pub use permissions::{is_authorized, license_gate, GrantSource, PermissionAggregator};
pub use plan_access::{PlanAccess, PlanAccessCache, PlanAccessResolver, PlanSource};
pub use redis::{FallbackStore, RedisService};
pub use session_cache::{CurrentSessionSource, SessionCache, SessionResolver};
