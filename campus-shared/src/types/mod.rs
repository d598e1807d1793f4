pub mod api;
pub mod auth;

pub use api::{ApiErrorDetail, ApiErrorResponse, ApiResponse, HealthCheck, HealthResponse, HealthStatus};
pub use auth::{AuthUser, Claims, JwtKeys, UserId};
