pub mod context;
pub mod session;

pub use context::{request_context_middleware, RequestContext};
pub use session::academic_session_middleware;
