use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use promoter_core::AppError;
use promoter_github::webhook::normalize_headers;

use crate::AppState;

/// Runs a delivery through the promotion pipeline and answers with its outcome.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    // Non-UTF-8 header values are dropped
    let headers = normalize_headers(
        headers.iter().filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
    );
    let bus = state
        .processor
        .process(body, &headers)
        .await
        .map_err(|e| AppError::Status(e.status_code(), e.to_string()))?;
    let response = bus.response();
    Ok((response.status_code, response.body).into_response())
}
