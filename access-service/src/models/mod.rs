pub mod audit_event;
pub mod institution;
pub mod module;
pub mod permission;
pub mod plan;
pub mod session;

pub use audit_event::{AuditEvent, FallbackEnvelope};
pub use institution::{Institution, INSTITUTION_TYPE_ALL};
pub use module::{Feature, Module};
pub use permission::{Permission, Role, RoleSummary};
pub use plan::Plan;
pub use session::AcademicSession;
