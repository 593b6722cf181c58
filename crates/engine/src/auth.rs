use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use promoter_core::config::AuthMode;
use promoter_github::{
    credentials::Credentials,
    events::{Envelope, EventType, WebhookEvent},
    installations::ClientCache,
    webhook::{DELIVERY_HEADER, EVENT_HEADER, validate_delivery},
};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, field::Empty};

use crate::{
    bus::{Bus, Context},
    error::ProcessError,
};

/// Bounds an authentication step by the delivery deadline.
async fn before<T, F>(deadline: Instant, step: &str, fut: F) -> Result<T>
where F: Future<Output = Result<T>> {
    timeout_at(deadline, fut).await.map_err(|_| anyhow!("Request deadline exceeded while {step}"))?
}

/// Turns a raw delivery into a [`Bus`] with an authenticated client.
pub struct Authenticator {
    pub credentials: Arc<Credentials>,
    pub clients: Arc<ClientCache>,
    /// Budget for the whole delivery, starting when authentication begins.
    pub timeout: Duration,
}

impl Authenticator {
    /// `headers` must already be lowercased. Only event types present in
    /// `handlers` are accepted.
    pub async fn authenticate<T>(
        &self,
        body: Bytes,
        headers: &HashMap<String, String>,
        handlers: &HashMap<EventType, T>,
    ) -> Result<Bus, ProcessError> {
        let deadline = Instant::now() + self.timeout;
        let event_name =
            headers.get(EVENT_HEADER).ok_or(ProcessError::MissingHeader(EVENT_HEADER))?;
        let delivery =
            headers.get(DELIVERY_HEADER).ok_or(ProcessError::MissingHeader(DELIVERY_HEADER))?;
        let event_type = event_name
            .parse::<EventType>()
            .ok()
            .filter(|e| handlers.contains_key(e))
            .ok_or_else(|| ProcessError::UnhandledEvent(event_name.clone()))?;

        let span = tracing::info_span!(
            "webhook",
            event = %event_type,
            delivery = %delivery,
            repo = Empty,
        );
        async {
            let secrets = before(deadline, "loading credentials", self.credentials.refresh())
                .await
                .map_err(ProcessError::Credentials)?;
            validate_delivery(&body, headers, secrets.webhook_secret())?;

            let envelope: Envelope = serde_json::from_slice(&body)
                .map_err(|source| ProcessError::Payload { what: "repository", source })?;
            tracing::Span::current().record("repo", envelope.repository.full_name.as_str());

            let installation_id = envelope.installation.as_ref().map(|i| i.id);
            if self.credentials.mode() == AuthMode::App && installation_id.is_none() {
                return Err(ProcessError::NoInstallation);
            }
            let client = before(
                deadline,
                "creating client",
                self.clients.client_for(secrets, installation_id),
            )
            .await
            .map_err(ProcessError::Client)?;

            let event = WebhookEvent::parse(event_type, &body)
                .map_err(|source| ProcessError::Payload { what: "event", source })?;
            let context = Context::new(
                envelope.repository.owner.login.clone(),
                envelope.repository.name().to_string(),
                client,
                tracing::Span::current(),
                deadline,
            );
            tracing::debug!("Authenticated delivery");
            Ok(Bus::new(
                body.clone(),
                headers.clone(),
                delivery.clone(),
                event,
                envelope.repository,
                context,
            ))
        }
        .instrument(span)
        .await
    }
}
