//! Typed webhook payloads for the events the promoter reacts to.
//!
//! Only the fields the pipeline reads are modelled; everything else in the
//! payload is ignored.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::Deserialize;

use crate::models::PullRequest;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EventType {
    Push,
    PullRequest,
    PullRequestReview,
    CheckSuite,
    WorkflowRun,
    DeploymentStatus,
    Status,
}

impl EventType {
    pub const fn variants() -> &'static [Self] {
        &[
            Self::Push,
            Self::PullRequest,
            Self::PullRequestReview,
            Self::CheckSuite,
            Self::WorkflowRun,
            Self::DeploymentStatus,
            Self::Status,
        ]
    }

    /// Name used in the `X-GitHub-Event` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::PullRequestReview => "pull_request_review",
            Self::CheckSuite => "check_suite",
            Self::WorkflowRun => "workflow_run",
            Self::DeploymentStatus => "deployment_status",
            Self::Status => "status",
        }
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::variants().iter().copied().find(|e| e.as_str() == s).ok_or(())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Decoded webhook payload, one variant per [`EventType`].
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Push(PushEvent),
    PullRequest(PullRequestEvent),
    PullRequestReview(PullRequestReviewEvent),
    CheckSuite(CheckSuiteEvent),
    WorkflowRun(WorkflowRunEvent),
    DeploymentStatus(DeploymentStatusEvent),
    Status(StatusEvent),
}

impl WebhookEvent {
    pub fn parse(event_type: EventType, body: &[u8]) -> serde_json::Result<Self> {
        Ok(match event_type {
            EventType::Push => Self::Push(serde_json::from_slice(body)?),
            EventType::PullRequest => Self::PullRequest(serde_json::from_slice(body)?),
            EventType::PullRequestReview => Self::PullRequestReview(serde_json::from_slice(body)?),
            EventType::CheckSuite => Self::CheckSuite(serde_json::from_slice(body)?),
            EventType::WorkflowRun => Self::WorkflowRun(serde_json::from_slice(body)?),
            EventType::DeploymentStatus => Self::DeploymentStatus(serde_json::from_slice(body)?),
            EventType::Status => Self::Status(serde_json::from_slice(body)?),
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Push(_) => EventType::Push,
            Self::PullRequest(_) => EventType::PullRequest,
            Self::PullRequestReview(_) => EventType::PullRequestReview,
            Self::CheckSuite(_) => EventType::CheckSuite,
            Self::WorkflowRun(_) => EventType::WorkflowRun,
            Self::DeploymentStatus(_) => EventType::DeploymentStatus,
            Self::Status(_) => EventType::Status,
        }
    }
}

/// Repository and installation fields common to every payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub repository: Repository,
    #[serde(default)]
    pub installation: Option<Installation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub owner: Owner,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_properties: HashMap<String, serde_json::Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Repository {
    /// Repository name without the owner.
    pub fn name(&self) -> &str {
        self.full_name.split_once('/').map_or(self.full_name.as_str(), |(_, name)| name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestReviewEvent {
    pub review: Review,
    pub pull_request: PullRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuiteEvent {
    pub check_suite: CheckSuite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuite {
    pub head_sha: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunEvent {
    pub workflow_run: WorkflowRun,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub head_sha: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentStatusEvent {
    pub deployment_status: DeploymentStatus,
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentStatus {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusEvent {
    pub sha: String,
    pub state: String,
}
