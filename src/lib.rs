pub mod api;
pub mod config;
pub mod logic;
pub mod model;

pub use api::*;
pub use logic::*;
pub use model::*;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::handlers::{handle_request, panic_response, propagate_response_headers, AppState};
use crate::api::routes::StubRouter;
use crate::model::{Fixtures, Spec};

/// OpenAPI document baked into the binary; used when no on-disk path is
/// configured.
pub const EMBEDDED_OPENAPI: &str = include_str!("../assets/openapi.json");
/// Companion fixture document for [`EMBEDDED_OPENAPI`].
pub const EMBEDDED_FIXTURES: &str = include_str!("../assets/fixtures.json");

/// Loads the OpenAPI document from the configured path, or the embedded
/// copy when none is set.
pub fn load_spec(config: &crate::config::AppConfig) -> Result<Spec> {
    match &config.assets.spec_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading OpenAPI document from '{path}'"))?;
            Spec::from_json_str(&raw)
        }
        None => Spec::from_json_str(EMBEDDED_OPENAPI),
    }
}

/// Loads the fixture document from the configured path, or the embedded
/// copy when none is set.
pub fn load_fixtures(config: &crate::config::AppConfig) -> Result<Fixtures> {
    match &config.assets.fixtures_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading fixtures from '{path}'"))?;
            Fixtures::from_json_str(&raw)
        }
        None => Fixtures::from_json_str(EMBEDDED_FIXTURES),
    }
}

/// Builds the axum application: a single fallback handler serves every
/// route in the document, and a catch-panic layer turns programmer errors
/// into the JSON 500 shape without taking the server down. The header
/// middleware sits outside the catch-panic layer so even a panic-recovered
/// 500 carries the request id and version headers.
pub fn build_router(mut spec: Spec, fixtures: Fixtures, version: String) -> Result<axum::Router> {
    spec.flatten();
    let router = StubRouter::from_spec(&spec)?;
    info!("routing to {} endpoint(s)", router.len());

    let state = Arc::new(AppState {
        spec,
        fixtures,
        router,
        version,
    });

    Ok(axum::Router::new()
        .fallback(handle_request)
        .layer(CatchPanicLayer::custom(
            |_err: Box<dyn std::any::Any + Send + 'static>| panic_response(),
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            propagate_response_headers,
        ))
        .with_state(state))
}

// Function for integration testing
pub async fn run_server() -> Result<()> {
    use tokio::net::TcpListener;

    // Load environment variables from a .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init();

    let config = crate::config::AppConfig::load()?;

    let spec = load_spec(&config)?;
    let fixtures = load_fixtures(&config)?;
    let app = build_router(spec, fixtures, config.version())?;

    let bind_address = format!("127.0.0.1:{}", config.server.http_port);
    let listener = TcpListener::bind(&bind_address).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
