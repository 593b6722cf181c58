pub mod config;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub enum AppError {
    /// A status code with a short message for the caller.
    Status(StatusCode, String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Status(status, message) => {
                if status.is_server_error() {
                    tracing::error!("{}: {}", status, message);
                } else {
                    tracing::warn!("{}: {}", status, message);
                }
                (status, message).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_kept() {
        for status in [StatusCode::FORBIDDEN, StatusCode::UNAUTHORIZED, StatusCode::BAD_GATEWAY] {
            let response = AppError::Status(status, "rejected".to_string()).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
