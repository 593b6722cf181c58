//! In-memory GitHub and bus builders for pipeline tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use promoter_github::{
    COMMITS_PER_PAGE, GitHubApi, PULL_REQUEST_COMMITS_PER_PAGE,
    events::{Envelope, EventType, WebhookEvent},
    models::{
        Commit, GitObject, GitRef, NewCheckRun, NewCommitStatus, NewPullRequest, PullRequest,
        PullRequestFilter, PullRequestRef, RateLimit,
    },
    webhook::{compute_signature, format_signature_header},
};
use serde_json::json;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::Span;

use crate::bus::{Bus, Context};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Call {
    ListPullRequests { head: Option<String>, base: Option<String> },
    CreatePullRequest(NewPullRequest),
    GetRef(String),
    CreateRef { branch: String, sha: String },
    UpdateRef { branch: String, sha: String, force: bool },
    ListCommits { branch: String, page: u32 },
    CreateCommitStatus { sha: String, status: NewCommitStatus },
    CreateCheckRun(NewCheckRun),
    ListPullRequestCommits { number: u64, page: u32 },
    RateLimit,
}

/// Records every call and serves pull requests, refs and commits from memory.
#[derive(Default)]
pub struct FakeGitHub {
    pull_requests: Mutex<Vec<PullRequest>>,
    refs: Mutex<HashMap<String, String>>,
    commits: HashMap<String, Vec<Commit>>,
    pull_request_commits: Vec<Commit>,
    failing: HashSet<&'static str>,
    hanging: HashSet<&'static str>,
    latency: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl FakeGitHub {
    pub fn with_pull_request(self, pull_request: PullRequest) -> Self {
        self.pull_requests.lock().unwrap().push(pull_request);
        self
    }

    pub fn with_ref(self, branch: &str, sha: &str) -> Self {
        self.refs.lock().unwrap().insert(branch.to_string(), sha.to_string());
        self
    }

    pub fn with_commits(mut self, branch: &str, commits: Vec<Commit>) -> Self {
        self.commits.insert(branch.to_string(), commits);
        self
    }

    pub fn with_pull_request_commits(mut self, commits: Vec<Commit>) -> Self {
        self.pull_request_commits = commits;
        self
    }

    /// Makes the named [`GitHubApi`] method return an error.
    pub fn failing(mut self, method: &'static str) -> Self {
        self.failing.insert(method);
        self
    }

    /// Makes the named [`GitHubApi`] method never answer.
    pub fn hanging(mut self, method: &'static str) -> Self {
        self.hanging.insert(method);
        self
    }

    /// Delays every answer, like a real network round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }

    pub fn ref_sha(&self, branch: &str) -> Option<String> {
        self.refs.lock().unwrap().get(branch).cloned()
    }

    async fn record(&self, method: &'static str, call: Call) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.calls.lock().unwrap().push(call);
        if self.hanging.contains(method) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(method) {
            bail!("{method} failed");
        }
        Ok(())
    }
}

fn page<T: Clone>(items: &[T], per_page: u8, page: u32) -> Vec<T> {
    items.chunks(per_page as usize).nth(page as usize - 1).map(<[T]>::to_vec).unwrap_or_default()
}

fn git_ref(branch: &str, sha: &str) -> GitRef {
    GitRef {
        ref_field: format!("refs/heads/{branch}"),
        object: GitObject { sha: sha.to_string(), kind: "commit".to_string() },
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn list_pull_requests(
        &self,
        _owner: &str,
        _repo: &str,
        filter: &PullRequestFilter,
    ) -> Result<Vec<PullRequest>> {
        self.record("list_pull_requests", Call::ListPullRequests {
            head: filter.head.clone(),
            base: filter.base.clone(),
        })
        .await?;
        let head = filter.head.as_deref().map(|h| h.split_once(':').map_or(h, |(_, b)| b));
        Ok(self
            .pull_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|pr| head.is_none_or(|h| pr.head.ref_field == h))
            .filter(|pr| filter.base.as_deref().is_none_or(|b| pr.base.ref_field == b))
            .cloned()
            .collect())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pull_request: &NewPullRequest,
    ) -> Result<PullRequest> {
        self.record("create_pull_request", Call::CreatePullRequest(pull_request.clone()))
            .await?;
        let mut pull_requests = self.pull_requests.lock().unwrap();
        let number = pull_requests.len() as u64 + 100;
        let refs = self.refs.lock().unwrap();
        let sha = |branch: &str| refs.get(branch).cloned().unwrap_or_default();
        let created = PullRequest {
            number,
            title: pull_request.title.clone(),
            state: "open".to_string(),
            draft: Some(false),
            merged: Some(false),
            html_url: Some(format!("https://github.com/{owner}/{repo}/pull/{number}")),
            head: PullRequestRef {
                ref_field: pull_request.head.clone(),
                sha: sha(&pull_request.head),
            },
            base: PullRequestRef {
                ref_field: pull_request.base.clone(),
                sha: sha(&pull_request.base),
            },
        };
        pull_requests.push(created.clone());
        Ok(created)
    }

    async fn get_ref(&self, _owner: &str, _repo: &str, branch: &str) -> Result<Option<GitRef>> {
        self.record("get_ref", Call::GetRef(branch.to_string())).await?;
        Ok(self.refs.lock().unwrap().get(branch).map(|sha| git_ref(branch, sha)))
    }

    async fn create_ref(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<GitRef> {
        self.record("create_ref", Call::CreateRef {
            branch: branch.to_string(),
            sha: sha.to_string(),
        })
        .await?;
        let mut refs = self.refs.lock().unwrap();
        if refs.contains_key(branch) {
            bail!("Reference already exists");
        }
        refs.insert(branch.to_string(), sha.to_string());
        Ok(git_ref(branch, sha))
    }

    async fn update_ref(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<GitRef> {
        self.record("update_ref", Call::UpdateRef {
            branch: branch.to_string(),
            sha: sha.to_string(),
            force,
        })
        .await?;
        self.refs.lock().unwrap().insert(branch.to_string(), sha.to_string());
        Ok(git_ref(branch, sha))
    }

    async fn list_commits(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        page_number: u32,
    ) -> Result<Vec<Commit>> {
        self.record("list_commits", Call::ListCommits {
            branch: branch.to_string(),
            page: page_number,
        })
        .await?;
        let commits = self.commits.get(branch).map(Vec::as_slice).unwrap_or_default();
        Ok(page(commits, COMMITS_PER_PAGE, page_number))
    }

    async fn create_commit_status(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
        status: &NewCommitStatus,
    ) -> Result<()> {
        self.record("create_commit_status", Call::CreateCommitStatus {
            sha: sha.to_string(),
            status: status.clone(),
        })
        .await
    }

    async fn create_check_run(
        &self,
        _owner: &str,
        _repo: &str,
        check_run: &NewCheckRun,
    ) -> Result<()> {
        self.record("create_check_run", Call::CreateCheckRun(check_run.clone())).await
    }

    async fn list_pull_request_commits(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
        page_number: u32,
    ) -> Result<Vec<Commit>> {
        self.record("list_pull_request_commits", Call::ListPullRequestCommits {
            number,
            page: page_number,
        })
        .await?;
        Ok(page(&self.pull_request_commits, PULL_REQUEST_COMMITS_PER_PAGE, page_number))
    }

    async fn rate_limit(&self) -> Result<RateLimit> {
        self.record("rate_limit", Call::RateLimit).await?;
        Ok(RateLimit { limit: 5000, remaining: 4990, used: 10, reset: 1_700_000_000 })
    }
}

pub fn commit(sha: &str, unix_timestamp: i64) -> Commit {
    Commit {
        sha: sha.to_string(),
        message: format!("Commit {sha}\n\nBody"),
        author: Some("octocat".to_string()),
        committed_at: OffsetDateTime::from_unix_timestamp(unix_timestamp).ok(),
    }
}

pub fn pull_request(number: u64, head: &str, base: &str, head_sha: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("Promote {head} to {base}"),
        state: "open".to_string(),
        draft: Some(false),
        merged: Some(false),
        html_url: Some(format!("https://github.com/octo/app/pull/{number}")),
        head: PullRequestRef { ref_field: head.to_string(), sha: head_sha.to_string() },
        base: PullRequestRef { ref_field: base.to_string(), sha: "base".to_string() },
    }
}

/// Adds the `octo/app` repository and installation 1 unless the payload has its own.
pub fn with_repository(body: &[u8]) -> Vec<u8> {
    let mut value: serde_json::Value = serde_json::from_slice(body).unwrap();
    if value.get("repository").is_none() {
        value["repository"] = json!({ "full_name": "octo/app", "owner": { "login": "octo" } });
    }
    if value.get("installation").is_none() {
        value["installation"] = json!({ "id": 1 });
    }
    serde_json::to_vec(&value).unwrap()
}

/// A bus as the authenticator would produce it, without signature checks.
pub fn bus_for(event: &str, body: &[u8], github: Arc<FakeGitHub>) -> Bus {
    let body = with_repository(body);
    let event_type: EventType = event.parse().unwrap();
    let event = WebhookEvent::parse(event_type, &body).unwrap();
    let envelope: Envelope = serde_json::from_slice(&body).unwrap();
    let context = Context::new(
        envelope.repository.owner.login.clone(),
        envelope.repository.name().to_string(),
        github,
        Span::none(),
        Instant::now() + Duration::from_secs(10),
    );
    Bus::new(
        Bytes::from(body),
        HashMap::new(),
        "delivery-1".to_string(),
        event,
        envelope.repository,
        context,
    )
}

/// Headers of a correctly signed delivery.
pub fn signed_headers(event: &str, body: &[u8], secret: &str) -> HashMap<String, String> {
    let signature = format_signature_header(&compute_signature(body, secret.as_bytes()));
    HashMap::from([
        ("x-github-event".to_string(), event.to_string()),
        ("x-github-delivery".to_string(), "72d3162e-cc78-11e3-81ab-4c9367dc0958".to_string()),
        ("x-hub-signature-256".to_string(), signature),
        ("content-type".to_string(), "application/json".to_string()),
    ])
}
