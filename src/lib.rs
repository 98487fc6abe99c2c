//! Append-only, hash-linked ledger for tourist identity and emergency
//! records, with an Axum HTTP adapter on top.
//!
//! The core ([`ledger::Ledger`]) is a single-writer, in-memory structure;
//! the route layer serializes mutations through one mutex.

pub mod error;
pub mod ledger;
pub mod model;
pub mod routes;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use ledger::Ledger;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Mutex<Ledger>>,
    pub started: Instant,
}

impl AppState {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            started: Instant::now(),
        }
    }
}

/// Build the full route tree. CORS is wide open for the demo UI.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/register-tourist", post(routes::register_tourist))
        .route(
            "/api/verify-tourist/:identity_hash",
            get(routes::verify_tourist),
        )
        .route("/api/emergency", post(routes::report_emergency))
        .route(
            "/api/emergency/:emergency_id/resolve",
            post(routes::resolve_emergency),
        )
        .route(
            "/api/tourist/:identity_hash/emergencies",
            get(routes::tourist_emergencies),
        )
        .route("/api/stats", get(routes::get_stats))
        .route("/api/blockchain", get(routes::get_blockchain))
        .route("/api/health", get(routes::health))
        .route("/api/demo-data", post(routes::demo_data))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
