//! Monster Tracker Backend
//!
//! Consumption log with a flavor catalog, persisted locally in SQLite or in a
//! realtime database, with live change streaming to every client.

mod api;
mod auth;
mod backend;
mod config;
mod db;
mod errors;
mod insight;
mod models;
mod notifier;
mod store;

use std::path::Path;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backend::{Backend, BackendKind, LocalBackend, OfflineBackend, RemoteBackend};
use config::{BackendMode, Config};
use errors::AppError;
use insight::InsightClient;
use store::Store;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub insight: Arc<InsightClient>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Monster Tracker Backend");
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.admin_passphrase == config::DEFAULT_PASSPHRASE {
        tracing::warn!("Using the default admin passphrase (MONSTER_ADMIN_PASSPHRASE)");
    }

    let backend = open_backend(&config.backend).await;
    let store = Store::open(backend).await;
    tracing::info!(
        "Store ready: {} backend, {} logs, {} flavors",
        store.kind(),
        store.list_logs().len(),
        store.list_flavors().len()
    );

    let insight = InsightClient::new(config.insight.clone())?;
    if !insight.has_key() {
        tracing::info!("No Gemini API key configured; insight will use the fallback text");
    }

    // Create application state
    let state = AppState {
        store,
        insight: Arc::new(insight),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the configured backend. Any failure is logged and the service runs
/// on a disconnected, empty stand-in instead.
pub async fn open_backend(mode: &BackendMode) -> Arc<dyn Backend> {
    match mode {
        BackendMode::Local { db_path } => {
            tracing::info!("Database path: {:?}", db_path);
            match open_local(db_path).await {
                Ok(backend) => Arc::new(backend),
                Err(e) => offline(BackendKind::Local, e),
            }
        }
        BackendMode::Remote(Some(options)) => {
            tracing::info!("Realtime database: {}", options.url);
            match RemoteBackend::connect(options.clone()) {
                Ok(backend) => Arc::new(backend),
                Err(e) => offline(BackendKind::Remote, e),
            }
        }
        BackendMode::Remote(None) => offline(
            BackendKind::Remote,
            AppError::Unavailable("MONSTER_REMOTE_URL is not set".to_string()),
        ),
    }
}

async fn open_local(db_path: &Path) -> Result<LocalBackend, AppError> {
    let pool = db::init_database(db_path).await?;
    LocalBackend::open(db::KvStore::new(pool)).await
}

fn offline(kind: BackendKind, err: AppError) -> Arc<dyn Backend> {
    tracing::error!("Failed to initialise {} backend: {}", kind, err);
    Arc::new(OfflineBackend::new(kind, err.message()))
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone passphrase for the admin layer
    let passphrase = state.config.admin_passphrase.clone();

    // API routes; reads are open, everything else goes through the admin layer
    let api_routes = Router::new()
        // Feed
        .route("/feed", get(api::get_feed))
        .route("/status", get(api::get_status))
        .route("/events", get(api::stream_events))
        .route("/insight", get(api::get_insight))
        // Logs
        .route("/logs", get(api::list_logs).post(api::create_log))
        .route("/logs/{id}", put(api::update_log).delete(api::delete_log))
        // Flavors
        .route("/flavors", get(api::list_flavors).post(api::create_flavor))
        .route(
            "/flavors/{id}",
            put(api::update_flavor).delete(api::delete_flavor),
        )
        .layer(middleware::from_fn(move |req, next| {
            auth::admin_auth_layer(passphrase.clone(), req, next)
        }))
        // Login checks the passphrase itself
        .route("/admin/login", post(api::login));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
