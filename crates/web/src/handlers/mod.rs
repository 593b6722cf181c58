use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/api/github/webhook", post(webhook::webhook))
        .route("/health", get(health))
}

async fn health() -> &'static str { "OK" }
