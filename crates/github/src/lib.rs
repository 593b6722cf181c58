pub mod credentials;
pub mod events;
pub mod installations;
pub mod models;
pub mod webhook;

use std::future::Future;

use anyhow::{Context, Result};
use async_trait::async_trait;
use http::StatusCode;
use octocrab::{GitHubError, Octocrab};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::models::{
    Commit, GitRef, NewCheckRun, NewCommitStatus, NewPullRequest, PullRequest, PullRequestFilter,
    RateLimit,
};

/// Page size used when walking a branch's history.
pub const COMMITS_PER_PAGE: u8 = 100;
/// Page size used when listing the commits of a pull request.
pub const PULL_REQUEST_COMMITS_PER_PAGE: u8 = 60;
const PULL_REQUESTS_PER_PAGE: u8 = 100;

/// The GitHub operations the promotion pipeline relies on.
///
/// Branch arguments are short names (`staging`, not `refs/heads/staging`).
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Lists open pull requests matching the filter, across all pages.
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        filter: &PullRequestFilter,
    ) -> Result<Vec<PullRequest>>;

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pull_request: &NewPullRequest,
    ) -> Result<PullRequest>;

    /// Returns `None` when the branch does not exist.
    async fn get_ref(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<GitRef>>;

    async fn create_ref(&self, owner: &str, repo: &str, branch: &str, sha: &str)
    -> Result<GitRef>;

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<GitRef>;

    /// One page (1-based) of the commits reachable from `branch`.
    async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        page: u32,
    ) -> Result<Vec<Commit>>;

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &NewCommitStatus,
    ) -> Result<()>;

    async fn create_check_run(&self, owner: &str, repo: &str, check_run: &NewCheckRun)
    -> Result<()>;

    /// One page (1-based) of the commits of a pull request.
    async fn list_pull_request_commits(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
    ) -> Result<Vec<Commit>>;

    async fn rate_limit(&self) -> Result<RateLimit>;
}

/// Calls `fetch` with increasing page numbers until a short page is returned.
pub async fn collect_pages<T, F, Fut>(per_page: u8, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(page).await.with_context(|| format!("Failed to fetch page {page}"))?;
        let done = batch.len() < per_page as usize;
        items.extend(batch);
        if done {
            break;
        }
        page += 1;
    }
    Ok(items)
}

/// Every commit reachable from `branch`.
pub async fn all_commits(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Result<Vec<Commit>> {
    collect_pages(COMMITS_PER_PAGE, |page| api.list_commits(owner, repo, branch, page)).await
}

pub async fn all_pull_request_commits(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    number: u64,
) -> Result<Vec<Commit>> {
    collect_pages(PULL_REQUEST_COMMITS_PER_PAGE, |page| {
        api.list_pull_request_commits(owner, repo, number, page)
    })
    .await
}

/// [`GitHubApi`] backed by an authenticated octocrab client.
#[derive(Clone)]
pub struct OctocrabApi {
    pub client: Octocrab,
}

impl OctocrabApi {
    pub fn new(client: Octocrab) -> Self { Self { client } }
}

#[derive(serde::Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

#[derive(serde::Serialize)]
struct PullRequestParams<'a> {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    head: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base: Option<&'a str>,
    per_page: u8,
    page: u32,
}

#[derive(serde::Serialize)]
struct CommitParams<'a> {
    sha: &'a str,
    per_page: u8,
    page: u32,
}

#[derive(Deserialize)]
struct RawCommit {
    sha: String,
    commit: RawCommitDetail,
}

#[derive(Deserialize)]
struct RawCommitDetail {
    #[serde(default)]
    message: String,
    author: Option<RawSignature>,
    committer: Option<RawSignature>,
}

#[derive(Deserialize)]
struct RawSignature {
    name: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    date: Option<OffsetDateTime>,
}

impl From<RawCommit> for Commit {
    fn from(value: RawCommit) -> Self {
        let RawCommitDetail { message, author, committer } = value.commit;
        Self {
            sha: value.sha,
            message,
            author: author.and_then(|a| a.name),
            committed_at: committer.and_then(|c| c.date),
        }
    }
}

#[derive(Deserialize)]
struct RawRateLimit {
    rate: RateLimit,
}

fn is_not_found(err: &octocrab::Error) -> bool {
    matches!(err, octocrab::Error::GitHub { source, .. }
        if matches!(**source, GitHubError { status_code: StatusCode::NOT_FOUND, .. }))
}

#[async_trait]
impl GitHubApi for OctocrabApi {
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        filter: &PullRequestFilter,
    ) -> Result<Vec<PullRequest>> {
        let route = format!("/repos/{owner}/{repo}/pulls");
        collect_pages(PULL_REQUESTS_PER_PAGE, |page| {
            let params = PullRequestParams {
                state: "open",
                head: filter.head.as_deref(),
                base: filter.base.as_deref(),
                per_page: PULL_REQUESTS_PER_PAGE,
                page,
            };
            let route = &route;
            async move {
                let items: Vec<PullRequest> = self.client.get(route, Some(&params)).await?;
                Ok(items)
            }
        })
        .await
        .with_context(|| format!("Failed to list pull requests for {owner}/{repo}"))
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pull_request: &NewPullRequest,
    ) -> Result<PullRequest> {
        self.client
            .post(format!("/repos/{owner}/{repo}/pulls"), Some(pull_request))
            .await
            .with_context(|| {
                format!(
                    "Failed to create pull request {} -> {} in {owner}/{repo}",
                    pull_request.head, pull_request.base
                )
            })
    }

    async fn get_ref(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<GitRef>> {
        let route = format!("/repos/{owner}/{repo}/git/ref/heads/{branch}");
        match self.client.get::<GitRef, _, _>(route, None::<&()>).await {
            Ok(git_ref) => Ok(Some(git_ref)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to fetch ref {branch} in {owner}/{repo}"))
            }
        }
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<GitRef> {
        let body = serde_json::json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        self.client
            .post(format!("/repos/{owner}/{repo}/git/refs"), Some(&body))
            .await
            .with_context(|| format!("Failed to create ref {branch} at {sha} in {owner}/{repo}"))
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<GitRef> {
        let body = serde_json::json!({ "sha": sha, "force": force });
        self.client
            .patch(format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"), Some(&body))
            .await
            .with_context(|| format!("Failed to update ref {branch} to {sha} in {owner}/{repo}"))
    }

    async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        page: u32,
    ) -> Result<Vec<Commit>> {
        let params = CommitParams { sha: branch, per_page: COMMITS_PER_PAGE, page };
        let commits: Vec<RawCommit> = self
            .client
            .get(format!("/repos/{owner}/{repo}/commits"), Some(&params))
            .await
            .with_context(|| format!("Failed to list commits of {branch} in {owner}/{repo}"))?;
        Ok(commits.into_iter().map(Commit::from).collect())
    }

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &NewCommitStatus,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .post(format!("/repos/{owner}/{repo}/statuses/{sha}"), Some(status))
            .await
            .with_context(|| format!("Failed to create commit status for {sha}"))?;
        Ok(())
    }

    async fn create_check_run(
        &self,
        owner: &str,
        repo: &str,
        check_run: &NewCheckRun,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .post(format!("/repos/{owner}/{repo}/check-runs"), Some(check_run))
            .await
            .with_context(|| format!("Failed to create check run for {}", check_run.head_sha))?;
        Ok(())
    }

    async fn list_pull_request_commits(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
    ) -> Result<Vec<Commit>> {
        let params =
            PageParams { per_page: Some(PULL_REQUEST_COMMITS_PER_PAGE), page: Some(page) };
        let commits: Vec<RawCommit> = self
            .client
            .get(format!("/repos/{owner}/{repo}/pulls/{number}/commits"), Some(&params))
            .await
            .with_context(|| format!("Failed to list commits of pull request #{number}"))?;
        Ok(commits.into_iter().map(Commit::from).collect())
    }

    async fn rate_limit(&self) -> Result<RateLimit> {
        let response: RawRateLimit = self
            .client
            .get("/rate_limit", None::<&()>)
            .await
            .context("Failed to fetch rate limit")?;
        Ok(response.rate)
    }
}
