use http::StatusCode;
use promoter_github::webhook::SignatureError;
use thiserror::Error;

/// Failures that happen before a [`crate::bus::Bus`] exists.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("unhandled event type {0:?}")]
    UnhandledEvent(String),
    #[error("failed to load credentials: {0:#}")]
    Credentials(anyhow::Error),
    #[error("invalid signature: {0}")]
    Signature(#[from] SignatureError),
    #[error("malformed {what}: {source}")]
    Payload {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no installation id")]
    NoInstallation,
    #[error("failed to create GitHub client: {0:#}")]
    Client(anyhow::Error),
}

impl ProcessError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingHeader(_) | Self::Payload { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnhandledEvent(_) => StatusCode::BAD_REQUEST,
            Self::Credentials(_) | Self::NoInstallation | Self::Client(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Signature(_) => StatusCode::FORBIDDEN,
        }
    }
}
