use std::sync::Arc;

use campus_shared::JwtKeys;
use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;

use campus_messaging::config::{AppConfig, StorageBackend};
use campus_messaging::profiles::ProfileClient;
use campus_messaging::realtime::Hub;
use campus_messaging::service::Messaging;
use campus_messaging::store::{ConversationStore, MemoryStore, PgStore};
use campus_messaging::{build_router, socket, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    campus_shared::middleware::init_tracing("campus-messaging");

    let config = AppConfig::load()?;
    let port = config.port;

    let metrics = match campus_shared::middleware::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    let store: Arc<dyn ConversationStore> = match config.storage {
        StorageBackend::Postgres => {
            let pool = campus_shared::clients::db::create_pool(&config.database_url, config.store_timeout())?;
            let store = PgStore::new(pool);
            // Refuse to start against a database without the messaging tables.
            store.verify_schema().await?;
            Arc::new(store)
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = Arc::new(Hub::new());
    let profiles = ProfileClient::new(reqwest::Client::new(), config.user_service_url.clone());
    let messaging = Arc::new(Messaging::new(store, hub, profiles, &config));
    let jwt = JwtKeys::new(&config.jwt_secret);

    // A send_message packet may carry a full-size image as a data URL.
    let (sio_layer, io) = SocketIo::builder()
        .max_payload(config.max_data_url_bytes() as u64)
        .build_layer();

    io.ns("/", {
        let messaging = messaging.clone();
        let jwt = jwt.clone();
        move |socket: SocketRef| {
            let messaging = messaging.clone();
            let jwt = jwt.clone();
            async move {
                socket::handlers::on_connect(socket, messaging, jwt).await;
            }
        }
    });

    let state = AppState {
        config: Arc::new(config),
        jwt,
        messaging,
        metrics,
    };
    let app = build_router(state).layer(sio_layer);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "campus-messaging starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
