//! Management and observability HTTP surface, plus the protection
//! middleware that fronts the demo handlers.

mod error;
pub mod handlers;
pub mod middleware;
mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_metrics_router, create_router};
