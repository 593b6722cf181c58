//! Per-event classifiers. Each decides whether a delivery is promotion
//! progress and fills in the refs, SHA and pull request it refers to.

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use promoter_github::{
    all_commits,
    events::{EventType, WebhookEvent},
    models::{Commit, NewPullRequest, PullRequest, PullRequestFilter},
};

use crate::{
    bus::{Bus, Context, EventStatus},
    promotion::normalise_full_ref,
    stage::Stage,
};

fn mismatch(expected: EventType, event: &WebhookEvent) -> anyhow::Error {
    anyhow!("Expected a {expected} event, got {}", event.event_type())
}

/// Skips the delivery when the event type is switched off.
fn disabled(bus: &mut Bus, enabled: bool) -> bool {
    if !enabled {
        bus.skip("event type is disabled");
    }
    !enabled
}

/// Copies refs, SHA and the pull request itself onto the context.
fn adopt_pull_request(ctx: &mut Context, pull_request: PullRequest) {
    ctx.set_head_ref(normalise_full_ref(&pull_request.head.ref_field));
    ctx.set_base_ref(normalise_full_ref(&pull_request.base.ref_field));
    ctx.set_head_sha(&pull_request.head.sha);
    ctx.set_pull_request(pull_request);
}

pub struct PushClassifier {
    pub enabled: bool,
    pub create_missing_target_branches: bool,
}

#[async_trait]
impl Stage for PushClassifier {
    fn name(&self) -> &'static str { "push" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::Push(event) = &bus.event else {
            return Err(mismatch(EventType::Push, &bus.event));
        };
        let event = event.clone();
        if event.deleted {
            bus.skip(format!("{} was deleted", event.ref_field));
            return Ok(());
        }
        let head = normalise_full_ref(&event.ref_field).to_string();
        let Some(base) = bus.context.promoter().is_promotable_ref(&head).map(str::to_string)
        else {
            bus.skip(format!("{head} has no next stage"));
            return Ok(());
        };

        let ctx = &mut bus.context;
        ctx.set_head_ref(&head);
        ctx.set_head_sha(&event.after);
        ctx.set_base_ref(&base);
        if self.create_missing_target_branches {
            ensure_branch(ctx, &head, &base).await?;
        }
        let pull_request = find_or_create_pull_request(ctx, &head, &base).await?;
        ctx.set_pull_request(pull_request);
        bus.status = EventStatus::Pending;
        Ok(())
    }
}

/// Oldest commit by committer date. Commits without a date are only used as a last resort.
fn root_commit(commits: &[Commit]) -> Option<&Commit> {
    commits
        .iter()
        .filter(|c| c.committed_at.is_some())
        .min_by_key(|c| c.committed_at)
        .or_else(|| commits.last())
}

async fn ensure_branch(ctx: &Context, head: &str, base: &str) -> Result<()> {
    let client = ctx.client.as_ref();
    if ctx.call(client.get_ref(&ctx.owner, &ctx.repository, base)).await?.is_some() {
        return Ok(());
    }
    let commits = ctx.call(all_commits(client, &ctx.owner, &ctx.repository, head)).await?;
    let root = root_commit(&commits).with_context(|| format!("Branch {head} has no commits"))?;
    tracing::info!("Creating missing branch {base} at {} (root of {head})", root.sha);
    ctx.call(client.create_ref(&ctx.owner, &ctx.repository, base, &root.sha)).await?;
    Ok(())
}

async fn find_or_create_pull_request(ctx: &Context, head: &str, base: &str) -> Result<PullRequest> {
    let client = ctx.client.as_ref();
    let filter = PullRequestFilter {
        head: Some(format!("{}:{head}", ctx.owner)),
        base: Some(base.to_string()),
    };
    let open = ctx.call(client.list_pull_requests(&ctx.owner, &ctx.repository, &filter)).await?;
    if let Some(existing) =
        open.into_iter().find(|pr| pr.head.ref_field == head && pr.base.ref_field == base)
    {
        tracing::info!("Reusing pull request #{} for {head} → {base}", existing.number);
        return Ok(existing);
    }
    let new = NewPullRequest {
        title: format!("Promote {head} to {base}"),
        head: head.to_string(),
        base: base.to_string(),
        body: format!("Promotes `{head}` to `{base}`.\n\nStages: {}", ctx.promoter()),
    };
    let created = ctx.call(client.create_pull_request(&ctx.owner, &ctx.repository, &new)).await?;
    tracing::info!("Created pull request #{} for {head} → {base}", created.number);
    Ok(created)
}

pub struct PullRequestClassifier {
    pub enabled: bool,
}

#[async_trait]
impl Stage for PullRequestClassifier {
    fn name(&self) -> &'static str { "pull_request" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::PullRequest(event) = &bus.event else {
            return Err(mismatch(EventType::PullRequest, &bus.event));
        };
        let event = event.clone();
        let number = event.pull_request.number;
        if event.pull_request.is_draft() {
            bus.skip(format!("pull request #{number} is a draft"));
            return Ok(());
        }
        match event.action.as_str() {
            "opened" => {
                adopt_pull_request(&mut bus.context, event.pull_request);
                bus.status = EventStatus::Pending;
            }
            // The fast-forward that merges a promotion already reported success.
            "closed" if event.pull_request.is_merged() => {
                bus.skip(format!("pull request #{number} was merged"));
            }
            "closed" => bus.skip(format!("pull request #{number} was closed")),
            action => bus.skip(format!("action {action} on pull request #{number}")),
        }
        Ok(())
    }
}

pub struct ReviewClassifier {
    pub enabled: bool,
}

#[async_trait]
impl Stage for ReviewClassifier {
    fn name(&self) -> &'static str { "pull_request_review" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::PullRequestReview(event) = &bus.event else {
            return Err(mismatch(EventType::PullRequestReview, &bus.event));
        };
        let event = event.clone();
        if !event.review.state.eq_ignore_ascii_case("approved") {
            bus.skip(format!("review state is {}", event.review.state));
            return Ok(());
        }
        adopt_pull_request(&mut bus.context, event.pull_request);
        bus.status = EventStatus::Pending;
        Ok(())
    }
}

/// Shared rules for `check_suite` and `workflow_run`.
fn classify_completed_run(
    bus: &mut Bus,
    head_sha: String,
    status: Option<String>,
    conclusion: Option<String>,
    pull_requests: Vec<PullRequest>,
) {
    if status.as_deref() != Some("completed") {
        bus.skip(format!("status is {}", status.as_deref().unwrap_or("unknown")));
        return;
    }
    if conclusion.as_deref() != Some("success") {
        bus.skip(format!("conclusion is {}", conclusion.as_deref().unwrap_or("unknown")));
        return;
    }
    let ctx = &mut bus.context;
    ctx.set_head_sha(&head_sha);
    let promoter = ctx.promoter();
    let matching = pull_requests
        .into_iter()
        .find(|pr| pr.head.sha == head_sha && promoter.is_promotion_request(pr));
    if let Some(pull_request) = matching {
        ctx.refine_refs(&pull_request);
        ctx.set_pull_request(pull_request);
    }
    bus.status = EventStatus::Pending;
}

pub struct CheckSuiteClassifier {
    pub enabled: bool,
}

#[async_trait]
impl Stage for CheckSuiteClassifier {
    fn name(&self) -> &'static str { "check_suite" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::CheckSuite(event) = &bus.event else {
            return Err(mismatch(EventType::CheckSuite, &bus.event));
        };
        let suite = event.check_suite.clone();
        classify_completed_run(
            bus,
            suite.head_sha,
            suite.status,
            suite.conclusion,
            suite.pull_requests,
        );
        Ok(())
    }
}

pub struct WorkflowRunClassifier {
    pub enabled: bool,
}

#[async_trait]
impl Stage for WorkflowRunClassifier {
    fn name(&self) -> &'static str { "workflow_run" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::WorkflowRun(event) = &bus.event else {
            return Err(mismatch(EventType::WorkflowRun, &bus.event));
        };
        let run = event.workflow_run.clone();
        classify_completed_run(bus, run.head_sha, run.status, run.conclusion, run.pull_requests);
        Ok(())
    }
}

pub struct DeploymentStatusClassifier {
    pub enabled: bool,
}

#[async_trait]
impl Stage for DeploymentStatusClassifier {
    fn name(&self) -> &'static str { "deployment_status" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::DeploymentStatus(event) = &bus.event else {
            return Err(mismatch(EventType::DeploymentStatus, &bus.event));
        };
        let event = event.clone();
        if event.deployment_status.state != "success" {
            bus.skip(format!("deployment state is {}", event.deployment_status.state));
            return Ok(());
        }
        bus.context.set_head_ref(normalise_full_ref(&event.deployment.ref_field));
        bus.context.set_head_sha(event.deployment.sha);
        bus.status = EventStatus::Pending;
        Ok(())
    }
}

pub struct StatusClassifier {
    pub enabled: bool,
}

#[async_trait]
impl Stage for StatusClassifier {
    fn name(&self) -> &'static str { "status" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if disabled(bus, self.enabled) {
            return Ok(());
        }
        let WebhookEvent::Status(event) = &bus.event else {
            return Err(mismatch(EventType::Status, &bus.event));
        };
        if event.state != "success" {
            let state = event.state.clone();
            bus.skip(format!("commit state is {state}"));
            return Ok(());
        }
        let sha = event.sha.clone();
        bus.context.set_head_sha(sha);
        bus.status = EventStatus::Pending;
        Ok(())
    }
}
