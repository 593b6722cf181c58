use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The subset of a pull request shared by the REST API and webhook payloads.
///
/// Pull requests embedded in `check_suite` and `workflow_run` payloads only carry
/// `number`, `head` and `base`, so everything else is defaulted.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub draft: Option<bool>,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub html_url: Option<String>,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

impl PullRequest {
    pub fn is_draft(&self) -> bool { self.draft.unwrap_or(false) }

    pub fn is_merged(&self) -> bool { self.merged.unwrap_or(false) }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub sha: String,
}

/// Filter for listing open pull requests.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PullRequestFilter {
    /// `owner:branch`, as the GitHub API expects.
    pub head: Option<String>,
    pub base: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub object: GitObject,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct GitObject {
    pub sha: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub committed_at: Option<OffsetDateTime>,
}

impl Commit {
    /// First line of the commit message.
    pub fn summary(&self) -> &str { self.message.lines().next().unwrap_or_default() }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Error,
    Failure,
    Pending,
    Success,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct NewCommitStatus {
    pub state: CommitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub description: String,
    pub context: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Neutral,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
}

/// A check run that is created already completed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct NewCheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: &'static str,
    pub conclusion: CheckConclusion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    pub output: CheckRunOutput,
}

impl NewCheckRun {
    pub fn completed(
        name: String,
        head_sha: String,
        conclusion: CheckConclusion,
        output: CheckRunOutput,
    ) -> Self {
        Self { name, head_sha, status: "completed", conclusion, details_url: None, output }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub used: u64,
    /// Unix timestamp of the next window.
    pub reset: u64,
}
