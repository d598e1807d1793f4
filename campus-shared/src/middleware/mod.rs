//! HTTP plumbing shared by every campus service: the `AuthUser` extractor,
//! tracing bootstrap and request metrics.

mod auth_extractor;
mod metrics_layer;
mod tracing_layer;

pub use metrics_layer::{init_metrics, metrics_middleware};
pub use tracing_layer::init_tracing;
