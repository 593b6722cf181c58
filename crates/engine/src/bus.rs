use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use http::StatusCode;
use promoter_github::{
    GitHubApi,
    events::{EventType, Repository, WebhookEvent},
    models::PullRequest,
};
use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tracing::Span;

use crate::promotion::Promoter;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Pending,
    Success,
    Failure,
    Error,
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Response {
    pub status_code: StatusCode,
    pub body: String,
}

impl Response {
    pub fn new(status_code: StatusCode, body: impl Into<String>) -> Self {
        Self { status_code, body: body.into() }
    }

    pub fn is_failure(&self) -> bool {
        self.status_code.is_client_error() || self.status_code.is_server_error()
    }
}

/// Promotion state of a single delivery.
///
/// Refs, SHA and pull request are set once; a later stage that disagrees is
/// ignored with a warning. Only [`Context::refine_refs`] may replace refs.
pub struct Context {
    pub owner: String,
    pub repository: String,
    head_ref: Option<String>,
    base_ref: Option<String>,
    head_sha: Option<String>,
    pull_request: Option<PullRequest>,
    promoter: Option<Arc<Promoter>>,
    pub client: Arc<dyn GitHubApi>,
    pub span: Span,
    pub deadline: Instant,
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &str)
where T: PartialEq + fmt::Debug {
    match slot {
        Some(existing) if *existing != value => {
            tracing::warn!("Ignoring {field} {value:?}, already set to {existing:?}");
        }
        Some(_) => {}
        None => *slot = Some(value),
    }
}

impl Context {
    pub fn new(
        owner: String,
        repository: String,
        client: Arc<dyn GitHubApi>,
        span: Span,
        deadline: Instant,
    ) -> Self {
        Self {
            owner,
            repository,
            head_ref: None,
            base_ref: None,
            head_sha: None,
            pull_request: None,
            promoter: None,
            client,
            span,
            deadline,
        }
    }

    pub fn head_ref(&self) -> Option<&str> { self.head_ref.as_deref() }

    pub fn base_ref(&self) -> Option<&str> { self.base_ref.as_deref() }

    pub fn head_sha(&self) -> Option<&str> { self.head_sha.as_deref() }

    pub fn pull_request(&self) -> Option<&PullRequest> { self.pull_request.as_ref() }

    /// The resolved promoter, or the default stages before resolution.
    pub fn promoter(&self) -> &Promoter {
        self.promoter.as_deref().unwrap_or_else(|| Promoter::default_ref())
    }

    pub fn set_head_ref(&mut self, head_ref: impl Into<String>) {
        set_once(&mut self.head_ref, head_ref.into(), "head ref");
    }

    pub fn set_base_ref(&mut self, base_ref: impl Into<String>) {
        set_once(&mut self.base_ref, base_ref.into(), "base ref");
    }

    pub fn set_head_sha(&mut self, head_sha: impl Into<String>) {
        set_once(&mut self.head_sha, head_sha.into(), "head SHA");
    }

    pub fn set_pull_request(&mut self, pull_request: PullRequest) {
        set_once(&mut self.pull_request, pull_request, "pull request");
    }

    pub fn set_promoter(&mut self, promoter: Promoter) {
        set_once(&mut self.promoter, Arc::new(promoter), "promoter");
    }

    /// Replaces both refs with those of a matching pull request.
    pub fn refine_refs(&mut self, pull_request: &PullRequest) {
        self.head_ref = Some(pull_request.head.ref_field.clone());
        self.base_ref = Some(pull_request.base.ref_field.clone());
    }

    /// Runs an outbound call, bounded by the request deadline.
    pub async fn call<T, F>(&self, fut: F) -> Result<T>
    where F: Future<Output = Result<T>> {
        self.call_until(self.deadline, fut).await
    }

    /// Runs an outbound call bounded by `deadline` instead of the request deadline.
    pub async fn call_until<T, F>(&self, deadline: Instant, fut: F) -> Result<T>
    where F: Future<Output = Result<T>> {
        timeout_at(deadline, fut).await.map_err(|_| anyhow!("Request deadline exceeded"))?
    }
}

/// Everything known about one delivery as it moves through the pipeline.
pub struct Bus {
    pub body: Bytes,
    pub headers: HashMap<String, String>,
    pub event_type: EventType,
    pub delivery: String,
    pub event: WebhookEvent,
    pub repository: Repository,
    pub context: Context,
    pub status: EventStatus,
    /// First hard error raised by a stage.
    pub error: Option<anyhow::Error>,
    pub response: Option<Response>,
}

impl Bus {
    pub fn new(
        body: Bytes,
        headers: HashMap<String, String>,
        delivery: String,
        event: WebhookEvent,
        repository: Repository,
        context: Context,
    ) -> Self {
        Self {
            body,
            headers,
            event_type: event.event_type(),
            delivery,
            event,
            repository,
            context,
            status: EventStatus::Pending,
            error: None,
            response: None,
        }
    }

    pub fn skip(&mut self, reason: impl fmt::Display) {
        tracing::info!("Skipping {} event: {}", self.event_type, reason);
        self.status = EventStatus::Skipped;
    }

    /// Records a hard error. Only the first one shapes the response.
    pub fn fail(&mut self, err: anyhow::Error) {
        self.status = EventStatus::Error;
        if self.error.is_some() {
            tracing::error!("Additional error: {err:?}");
            return;
        }
        tracing::error!("Failed to process {} event: {err:?}", self.event_type);
        self.respond_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to process {} event: {err:#}", self.event_type),
        );
        self.error = Some(err);
    }

    /// Sets a failure response unless an earlier failure already did.
    pub fn respond_failure(&mut self, status_code: StatusCode, body: impl Into<String>) {
        if self.response.as_ref().is_some_and(Response::is_failure) {
            return;
        }
        self.response = Some(Response::new(status_code, body));
    }

    pub fn response_status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status_code)
    }

    /// The response to send back, defaulting to `200` with the event status.
    pub fn response(&self) -> Response {
        self.response.clone().unwrap_or_else(|| Response::new(StatusCode::OK, self.status.as_str()))
    }
}
