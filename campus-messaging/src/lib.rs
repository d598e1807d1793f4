pub mod config;
pub mod models;
pub mod profiles;
pub mod realtime;
pub mod routes;
pub mod schema;
pub mod service;
pub mod socket;
pub mod store;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRef};
use axum::routing::{get, post};
use axum::{middleware, Router};
use campus_shared::JwtKeys;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::AppConfig;
use service::Messaging;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub messaging: Arc<Messaging>,
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// HTTP routes. The Socket.IO layer is added by the binary on top of this.
pub fn build_router(state: AppState) -> Router {
    // Multipart framing and the optional text part ride on top of the image.
    let upload_limit = state.config.max_image_bytes + 64 * 1024;
    let json_limit = state.config.max_data_url_bytes();

    Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Conversations
        .route(
            "/conversations",
            get(routes::conversations::list_conversations).post(routes::conversations::create_conversation),
        )
        .route(
            "/conversations/:id",
            get(routes::conversations::get_conversation).delete(routes::conversations::delete_conversation),
        )
        .route("/unread-count", get(routes::conversations::get_unread_count))
        // Messages
        .route(
            "/conversations/:id/send",
            post(routes::messages::send_message).layer(DefaultBodyLimit::max(json_limit)),
        )
        .route(
            "/conversations/:id/read",
            post(routes::messages::mark_as_read).put(routes::messages::mark_as_read),
        )
        .route(
            "/conversations/with-image/:id",
            post(routes::messages::send_message_with_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(middleware::from_fn(campus_shared::middleware::metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
