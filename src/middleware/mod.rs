pub mod rate_limit;
pub mod request_id;

pub use rate_limit::{RateLimitConfig, RateLimitMiddleware, RateLimitStore, RateLimiter};
pub use request_id::{CorrelationId, RequestIdExt, RequestIdMiddleware};
