use std::{net::SocketAddr, path::Path};

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;

use services::{notify::Notifier, storage::UploadStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowdhub_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env();

    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let state = AppState::new(db, config.clone());
    state.storage.init().await?;

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .merge(routes::projects::router())
        .merge(routes::comments::router())
        .merge(routes::attachments::router())
        .merge(routes::chat::router())
        .merge(routes::collaborations::router())
        .merge(routes::discussions::router())
        .merge(routes::replies::router())
        .merge(routes::notifications::router())
        .merge(routes::dashboard::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::resolve_context,
        ));

    let static_dir = Path::new(&state.config.static_dir);
    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_path))
        .fallback_service(spa)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub notifier: Notifier,
    pub storage: UploadStorage,
}

impl AppState {
    pub fn new(db: db::Database, config: config::Config) -> Self {
        Self {
            notifier: Notifier::new(db.pool.clone()),
            storage: UploadStorage::new(&config.upload_path),
            db,
            config,
        }
    }
}
