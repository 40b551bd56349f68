pub mod handlers;

use crate::cli::globals::GlobalArgs;
use crate::identity::{GoogleTokenVerifier, SchemaCapabilities, UserRepo};
use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the pool, detect schema capabilities, wire the router and serve.
pub async fn new(port: u16, dsn: String, globals: GlobalArgs) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(globals.db_timeout)
        .max_lifetime(Duration::from_secs(30 * 60))
        .connect(&dsn)
        .await
        .context("failed to connect to database")?;

    // One metadata probe per process; handlers receive immutable copies.
    let caps = SchemaCapabilities::detect(&pool).await;

    let repo = UserRepo::new(pool, caps, globals.db_timeout, globals.hash_time_cost)?;
    let verifier = Arc::new(GoogleTokenVerifier::new(
        globals.google_client_id.clone(),
        APP_USER_AGENT,
    )?);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!(port, "starting {APP_USER_AGENT}");

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/login/google", post(handlers::login_google))
        .route("/api/profile", put(handlers::update_profile))
        .route("/api/user", get(handlers::find_user))
        .route("/api/user/:id/tutorial", put(handlers::mark_tutorial_seen))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&globals.cors_origins))
        .layer(Extension(repo))
        .layer(Extension(verifier))
        .layer(Extension(globals));

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// CORS for the roster frontend: mirrors the configured origins and allows
/// the caller-identity header alongside JSON bodies.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-user-email")])
        .max_age(Duration::from_secs(86400));

    if origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}
