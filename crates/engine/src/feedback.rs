//! Commit status and check run reporting for a finished delivery.

use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use promoter_core::config::{CheckRunConfig, CommitStatusConfig};
use promoter_github::{
    all_pull_request_commits,
    models::{
        CheckConclusion, CheckRunOutput, CommitState, NewCheckRun, NewCommitStatus, PullRequest,
    },
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::Instant;

use crate::{
    bus::{Bus, Context, EventStatus},
    stage::Stage,
    templates::{CHECK_RUN, Templates},
};

/// Longest description or title GitHub displays in full.
pub const MAX_MESSAGE_LEN: usize = 140;

const ELLIPSIS: &str = "...";

pub fn truncate(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(max.saturating_sub(ELLIPSIS.len())).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Values for the `{source}`, `{target}`, `{progress}` and `{timestamp}` placeholders.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Placeholders {
    pub source: String,
    pub target: String,
    pub progress: String,
    pub timestamp: String,
}

impl Placeholders {
    pub fn new(ctx: &Context, now: OffsetDateTime) -> Self {
        let promoter = ctx.promoter();
        let source = ctx.head_ref().unwrap_or("unknown");
        let target =
            ctx.base_ref().or_else(|| promoter.is_promotable_ref(source)).unwrap_or("unknown");
        Self {
            source: source.to_string(),
            target: target.to_string(),
            progress: promoter.progress(source),
            timestamp: now.format(&Rfc3339).unwrap_or_default(),
        }
    }

    pub fn apply(&self, template: &str) -> String {
        template
            .replace("{source}", &self.source)
            .replace("{target}", &self.target)
            .replace("{progress}", &self.progress)
            .replace("{timestamp}", &self.timestamp)
    }

    /// Substitutes and truncates to [`MAX_MESSAGE_LEN`].
    pub fn message(&self, template: &str) -> String {
        truncate(&self.apply(template), MAX_MESSAGE_LEN)
    }
}

pub fn commit_state(status: EventStatus, failed: bool) -> CommitState {
    if failed {
        return CommitState::Error;
    }
    match status {
        EventStatus::Success => CommitState::Success,
        EventStatus::Failure => CommitState::Failure,
        EventStatus::Error => CommitState::Error,
        EventStatus::Pending | EventStatus::Skipped => CommitState::Pending,
    }
}

pub fn check_conclusion(status: EventStatus, failed: bool) -> CheckConclusion {
    if !failed && status == EventStatus::Success {
        CheckConclusion::Success
    } else {
        CheckConclusion::Neutral
    }
}

#[derive(Serialize)]
struct StageView<'a> {
    name: &'a str,
    state: &'static str,
}

#[derive(Serialize)]
struct CommitView {
    sha: String,
    summary: String,
    author: Option<String>,
}

#[derive(Serialize)]
struct CheckRunView<'a> {
    status: EventStatus,
    source: &'a str,
    target: &'a str,
    progress: &'a str,
    timestamp: &'a str,
    stages: Vec<StageView<'a>>,
    error: Option<String>,
    pull_request: Option<&'a PullRequest>,
    commits: Vec<CommitView>,
}

/// Reports the outcome of a delivery back to GitHub. Runs after every other stage.
///
/// Its calls are bounded by the request deadline plus `grace`, so a delivery
/// that failed by running out of time still gets its error status posted.
pub struct Feedback {
    pub commit_status: CommitStatusConfig,
    pub check_run: CheckRunConfig,
    pub templates: Arc<Templates>,
    pub grace: Duration,
}

impl Feedback {
    async fn check_run_summary(
        &self,
        bus: &Bus,
        placeholders: &Placeholders,
        deadline: Instant,
    ) -> Result<String> {
        let ctx = &bus.context;
        let commits = match ctx.pull_request() {
            Some(pr) => {
                let listed = ctx
                    .call_until(
                        deadline,
                        all_pull_request_commits(
                            ctx.client.as_ref(),
                            &ctx.owner,
                            &ctx.repository,
                            pr.number,
                        ),
                    )
                    .await;
                listed.unwrap_or_else(|e| {
                    tracing::warn!("Failed to list commits of pull request #{}: {e:#}", pr.number);
                    Vec::new()
                })
            }
            None => Vec::new(),
        };
        let promoter = ctx.promoter();
        let source_index = promoter.stage_index(&placeholders.source);
        let stages = promoter
            .stages()
            .iter()
            .enumerate()
            .map(|(i, name)| StageView {
                name,
                state: match source_index {
                    Some(s) if i < s => "done",
                    Some(s) if i == s => "source",
                    Some(s) if i == s + 1 => "target",
                    _ => "pending",
                },
            })
            .collect();
        let view = CheckRunView {
            status: bus.status,
            source: &placeholders.source,
            target: &placeholders.target,
            progress: &placeholders.progress,
            timestamp: &placeholders.timestamp,
            stages,
            error: bus.error.as_ref().map(|e| format!("{e:#}")),
            pull_request: ctx.pull_request(),
            commits: commits
                .iter()
                .map(|c| CommitView {
                    sha: c.sha.clone(),
                    summary: c.summary().to_string(),
                    author: c.author.clone(),
                })
                .collect(),
        };
        self.templates.render(CHECK_RUN, view)
    }
}

#[async_trait]
impl Stage for Feedback {
    fn name(&self) -> &'static str { "feedback" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if bus.status == EventStatus::Skipped {
            return Ok(());
        }
        if !self.check_run.enabled && !self.commit_status.enabled {
            return Ok(());
        }
        let Some(sha) = bus.context.head_sha().map(str::to_string) else {
            tracing::debug!("No head SHA to report on");
            return Ok(());
        };
        let placeholders = Placeholders::new(&bus.context, OffsetDateTime::now_utc());
        let details_url = bus.context.pull_request().and_then(|pr| pr.html_url.clone());
        let deadline = bus.context.deadline + self.grace;

        if self.check_run.enabled {
            match self.check_run_summary(bus, &placeholders, deadline).await {
                Ok(summary) => {
                    let conclusion = check_conclusion(bus.status, bus.error.is_some());
                    let mut check_run = NewCheckRun::completed(
                        placeholders.message(&self.check_run.name),
                        sha.clone(),
                        conclusion,
                        CheckRunOutput {
                            title: placeholders.message(&self.check_run.title),
                            summary,
                        },
                    );
                    check_run.details_url = details_url.clone();
                    let ctx = &bus.context;
                    let posted = ctx
                        .call_until(
                            deadline,
                            ctx.client.create_check_run(&ctx.owner, &ctx.repository, &check_run),
                        )
                        .await;
                    if let Err(e) = posted {
                        tracing::warn!("Failed to create check run for {sha}: {e:#}");
                    }
                }
                Err(e) => bus.fail(e.context("Failed to render check run")),
            }
        }

        if self.commit_status.enabled {
            let status = NewCommitStatus {
                state: commit_state(bus.status, bus.error.is_some()),
                target_url: details_url,
                description: placeholders.message(&self.commit_status.description),
                context: placeholders.message(&self.commit_status.context),
            };
            let ctx = &bus.context;
            let posted = ctx
                .call_until(
                    deadline,
                    ctx.client.create_commit_status(&ctx.owner, &ctx.repository, &sha, &status),
                )
                .await
                .with_context(|| format!("Failed to create {} status", status.state));
            if let Err(e) = posted {
                tracing::warn!("{e:#}");
            }
        }
        Ok(())
    }
}
