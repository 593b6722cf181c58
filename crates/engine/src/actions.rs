//! Stages that act on a classified delivery.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use http::StatusCode;
use promoter_github::{
    events::EventType,
    models::{PullRequest, PullRequestFilter},
};
use time::{OffsetDateTime, macros::format_description};

use crate::{
    bus::{Bus, Context, EventStatus, Response},
    gate::RateGate,
    stage::Stage,
    storage::ObjectStore,
};

/// Fast-forwards the next stage to the head SHA once a promotion is ready.
pub struct FastForwarder;

async fn find_promotion_pull_request(ctx: &Context, sha: &str) -> Result<PullRequest> {
    let filter = PullRequestFilter {
        head: ctx.head_ref().map(|head| format!("{}:{head}", ctx.owner)),
        base: None,
    };
    let open =
        ctx.call(ctx.client.list_pull_requests(&ctx.owner, &ctx.repository, &filter)).await?;
    let promoter = ctx.promoter();
    open.into_iter()
        .find(|pr| pr.head.sha == sha && promoter.is_promotion_request(pr))
        .with_context(|| format!("No open promotion pull request for {sha}"))
}

#[async_trait]
impl Stage for FastForwarder {
    fn name(&self) -> &'static str { "fast_forward" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        let Some(sha) = bus.context.head_sha().map(str::to_string) else {
            bus.skip("no head SHA");
            return Ok(());
        };
        let ctx = &mut bus.context;
        let refs =
            ctx.head_ref().zip(ctx.base_ref()).map(|(h, b)| (h.to_string(), b.to_string()));
        let (head, base) = match refs {
            Some(refs) => refs,
            None => {
                let pull_request = find_promotion_pull_request(ctx, &sha).await?;
                tracing::info!("Resolved pull request #{} for {sha}", pull_request.number);
                ctx.refine_refs(&pull_request);
                let head = pull_request.head.ref_field.clone();
                let base = pull_request.base.ref_field.clone();
                ctx.set_pull_request(pull_request);
                (head, base)
            }
        };
        if ctx.promoter().is_promotable_ref(&head) != Some(base.as_str()) {
            bus.skip(format!("{head} is not promotable to {base}"));
            return Ok(());
        }

        tracing::info!("Fast-forwarding {base} to {sha} from {head}");
        ctx.call(ctx.client.update_ref(&ctx.owner, &ctx.repository, &base, &sha, false))
            .await
            .with_context(|| format!("Failed to fast-forward {base} to {sha}"))?;
        bus.status = EventStatus::Success;
        bus.response = Some(Response::new(StatusCode::NO_CONTENT, ""));
        Ok(())
    }
}

/// Logs the remaining API quota after a successful fast-forward.
pub struct RateLimitSampler {
    pub enabled: bool,
    pub gate: Arc<dyn RateGate>,
}

#[async_trait]
impl Stage for RateLimitSampler {
    fn name(&self) -> &'static str { "rate_limit" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if !self.enabled || bus.response_status() != Some(StatusCode::NO_CONTENT) {
            return Ok(());
        }
        if !self.gate.try_acquire() {
            return Ok(());
        }
        let ctx = &bus.context;
        match ctx.call(ctx.client.rate_limit()).await {
            Ok(rate) => tracing::info!(
                remaining = rate.remaining,
                limit = rate.limit,
                used = rate.used,
                reset = rate.reset,
                "GitHub rate limit"
            ),
            Err(e) => tracing::warn!("Failed to sample rate limit: {e:#}"),
        }
        Ok(())
    }
}

/// Uploads the raw payload. A failed upload changes the response, not the event status.
pub struct Archiver {
    pub enabled: bool,
    pub bucket: String,
    pub store: Arc<dyn ObjectStore>,
}

pub fn archive_key(event_type: EventType, at: OffsetDateTime, delivery: &str) -> String {
    let timestamp = at
        .format(format_description!("[year][month][day]T[hour][minute][second]Z"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("{event_type}/{timestamp}-{delivery}.json")
}

#[async_trait]
impl Stage for Archiver {
    fn name(&self) -> &'static str { "archive" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        if !self.enabled || self.bucket.is_empty() {
            return Ok(());
        }
        let key = archive_key(bus.event_type, OffsetDateTime::now_utc(), &bus.delivery);
        let upload = self.store.put_object(&key, &self.bucket, bus.body.clone());
        match bus.context.call(upload).await {
            Ok(()) => tracing::debug!("Archived payload as {}/{key}", self.bucket),
            Err(e) => {
                tracing::error!("Failed to archive payload {key}: {e:#}");
                bus.respond_failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to archive payload: {e:#}"),
                );
            }
        }
        Ok(())
    }
}
