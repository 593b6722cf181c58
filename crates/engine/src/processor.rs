use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bytes::Bytes;
use promoter_core::config::Config;
use promoter_github::{
    credentials::Credentials,
    events::EventType,
    installations::{ClientCache, OctocrabFactory},
};
use tracing::Instrument;

use crate::{
    actions::{Archiver, FastForwarder, RateLimitSampler},
    auth::Authenticator,
    bus::{Bus, EventStatus},
    classify::{
        CheckSuiteClassifier, DeploymentStatusClassifier, PullRequestClassifier, PushClassifier,
        ReviewClassifier, StatusClassifier, WorkflowRunClassifier,
    },
    error::ProcessError,
    feedback::Feedback,
    gate::{IntervalGate, RateGate},
    stage::{SelectPromoter, Stage},
    storage::{FsObjectStore, ObjectStore},
    templates::Templates,
};

type Chain = Vec<Arc<dyn Stage>>;

/// Runs a delivery through authentication, its handler chain and feedback.
pub struct Processor {
    authenticator: Authenticator,
    pre: Chain,
    handlers: HashMap<EventType, Chain>,
    post: Chain,
    feedback: Arc<dyn Stage>,
}

impl Processor {
    /// Builds the production pipeline: octocrab clients, filesystem archive and
    /// an interval-gated rate limit sampler.
    pub fn from_config(config: &Config) -> Result<Self> {
        let ttl = config.github.client_cache_ttl_secs.map(Duration::from_secs);
        let factory = Arc::new(OctocrabFactory { mode: config.github.auth });
        let authenticator = Authenticator {
            credentials: Arc::new(Credentials::from_config(&config.github)),
            clients: Arc::new(ClientCache::new(factory, ttl)),
            timeout: config.server.request_timeout(),
        };
        Self::new(
            config,
            authenticator,
            Arc::new(FsObjectStore::new(&config.archive.directory)),
            Arc::new(IntervalGate::new(config.rate_limit.interval())),
        )
    }

    pub fn new(
        config: &Config,
        authenticator: Authenticator,
        store: Arc<dyn ObjectStore>,
        gate: Arc<dyn RateGate>,
    ) -> Result<Self> {
        let events = &config.events;
        let fast_forward: Arc<dyn Stage> = Arc::new(FastForwarder);
        let then_fast_forward = |classifier: Arc<dyn Stage>| vec![classifier, fast_forward.clone()];
        let push: Arc<dyn Stage> = Arc::new(PushClassifier {
            enabled: events.push,
            create_missing_target_branches: config.promotion.create_missing_target_branches,
        });
        let pull_request: Arc<dyn Stage> =
            Arc::new(PullRequestClassifier { enabled: events.pull_request });
        let handlers = HashMap::from([
            (EventType::Push, vec![push]),
            (EventType::PullRequest, vec![pull_request]),
            (
                EventType::PullRequestReview,
                then_fast_forward(Arc::new(ReviewClassifier {
                    enabled: events.pull_request_review,
                })),
            ),
            (
                EventType::CheckSuite,
                then_fast_forward(Arc::new(CheckSuiteClassifier { enabled: events.check_suite })),
            ),
            (
                EventType::WorkflowRun,
                then_fast_forward(Arc::new(WorkflowRunClassifier {
                    enabled: events.workflow_run,
                })),
            ),
            (
                EventType::DeploymentStatus,
                then_fast_forward(Arc::new(DeploymentStatusClassifier {
                    enabled: events.deployment_status,
                })),
            ),
            (
                EventType::Status,
                then_fast_forward(Arc::new(StatusClassifier { enabled: events.status })),
            ),
        ]);
        let templates = Templates::new(config.feedback.check_run.template.as_deref())
            .context("Failed to load feedback templates")?;
        Ok(Self {
            authenticator,
            pre: vec![Arc::new(SelectPromoter {
                property: config.promotion.stages_property.clone(),
            })],
            handlers,
            post: vec![
                Arc::new(RateLimitSampler { enabled: config.rate_limit.enabled, gate }),
                Arc::new(Archiver {
                    enabled: config.archive.enabled,
                    bucket: config.archive.bucket.clone(),
                    store,
                }),
            ],
            feedback: Arc::new(Feedback {
                commit_status: config.feedback.commit_status.clone(),
                check_run: config.feedback.check_run.clone(),
                templates: Arc::new(templates),
                grace: config.server.feedback_grace(),
            }),
        })
    }

    pub fn credentials(&self) -> &Credentials { &self.authenticator.credentials }

    /// Processes one delivery. `headers` must already be lowercased.
    ///
    /// Fails only when no [`Bus`] could be built; every later failure is
    /// reported through the bus status and response.
    pub async fn process(
        &self,
        body: Bytes,
        headers: &HashMap<String, String>,
    ) -> Result<Bus, ProcessError> {
        let mut bus = self.authenticator.authenticate(body, headers, &self.handlers).await?;
        let span = bus.context.span.clone();
        async {
            let chain = self.handlers.get(&bus.event_type).map(Vec::as_slice).unwrap_or_default();
            for stage in self.pre.iter().chain(chain) {
                tracing::debug!("Running {}", stage.name());
                if let Err(e) = stage.run(&mut bus).await {
                    bus.fail(e);
                    break;
                }
                if bus.status == EventStatus::Skipped {
                    break;
                }
            }
            for stage in self.post.iter().chain([&self.feedback]) {
                if let Err(e) = stage.run(&mut bus).await {
                    tracing::warn!("Stage {} failed: {e:#}", stage.name());
                }
            }
            let response = bus.response();
            tracing::info!(
                status = %bus.status,
                code = response.status_code.as_u16(),
                "Processed {} event",
                bus.event_type
            );
        }
        .instrument(span)
        .await;
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use promoter_core::config::AuthMode;
    use promoter_github::{
        GitHubApi,
        credentials::Secrets,
        installations::ClientFactory,
        models::{CommitState, NewPullRequest},
    };
    use serde_json::json;

    use super::*;
    use crate::testing::{Call, FakeGitHub, pull_request, signed_headers, with_repository};

    const SECRET: &str = "It's a Secret to Everybody";

    struct FakeFactory(Arc<FakeGitHub>);

    impl ClientFactory for FakeFactory {
        fn create(&self, _secrets: &Secrets, _id: Option<u64>) -> Result<Arc<dyn GitHubApi>> {
            Ok(self.0.clone())
        }
    }

    fn processor(github: Arc<FakeGitHub>) -> Processor {
        processor_with_timeout(github, Config::default().server.request_timeout())
    }

    fn processor_with_timeout(github: Arc<FakeGitHub>, timeout: Duration) -> Processor {
        let secrets = Secrets {
            app_id: Some(1),
            private_key: Some("pem".to_string()),
            webhook_secret: Some(SECRET.to_string()),
            token: None,
        };
        let authenticator = Authenticator {
            credentials: Arc::new(Credentials::with_secrets(AuthMode::App, secrets)),
            clients: Arc::new(ClientCache::new(Arc::new(FakeFactory(github)), None)),
            timeout,
        };
        Processor::new(
            &Config::default(),
            authenticator,
            Arc::new(FsObjectStore::new(std::env::temp_dir())),
            Arc::new(IntervalGate::new(Config::default().rate_limit.interval())),
        )
        .unwrap()
    }

    async fn deliver(processor: &Processor, event: &str, payload: serde_json::Value) -> Bus {
        let body = with_repository(&serde_json::to_vec(&payload).unwrap());
        let headers = signed_headers(event, &body, SECRET);
        match processor.process(Bytes::from(body), &headers).await {
            Ok(bus) => bus,
            Err(e) => panic!("{e}"),
        }
    }

    #[tokio::test]
    async fn test_push_opens_promotion_pull_request() {
        let github = Arc::new(FakeGitHub::default());
        let processor = processor(github.clone());
        let bus = deliver(
            &processor,
            "push",
            json!({ "ref": "refs/heads/main", "before": "000", "after": "abc" }),
        )
        .await;
        assert_eq!(bus.status, EventStatus::Pending);
        assert_eq!(bus.response().status_code.as_u16(), 200);
        assert_eq!(bus.response().body, "pending");

        let calls = github.calls();
        assert_eq!(calls[0], Call::ListPullRequests {
            head: Some("octo:main".to_string()),
            base: Some("staging".to_string()),
        });
        let Call::CreatePullRequest(NewPullRequest { title, head, base, .. }) = &calls[1] else {
            panic!("{calls:?}")
        };
        assert_eq!(title, "Promote main to staging");
        assert_eq!((head.as_str(), base.as_str()), ("main", "staging"));
        let Call::CreateCommitStatus { sha, status } = &calls[2] else { panic!("{calls:?}") };
        assert_eq!(sha, "abc");
        assert_eq!(status.state, CommitState::Pending);
        assert_eq!(status.target_url.as_deref(), Some("https://github.com/octo/app/pull/100"));
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_deployment_is_skipped_without_calls() {
        let github = Arc::new(FakeGitHub::default());
        let processor = processor(github.clone());
        let bus = deliver(
            &processor,
            "deployment_status",
            json!({
                "action": "created",
                "deployment_status": { "state": "failure" },
                "deployment": { "ref": "main", "sha": "abc" },
            }),
        )
        .await;
        assert_eq!(bus.status, EventStatus::Skipped);
        assert_eq!(bus.response().status_code.as_u16(), 200);
        assert!(github.calls().is_empty());
    }

    #[tokio::test]
    async fn test_successful_status_fast_forwards() {
        let github = Arc::new(
            FakeGitHub::default()
                .with_ref("staging", "old")
                .with_pull_request(pull_request(7, "main", "staging", "abc")),
        );
        let processor = processor(github.clone());
        let bus =
            deliver(&processor, "status", json!({ "sha": "abc", "state": "success" })).await;
        assert_eq!(bus.status, EventStatus::Success);
        assert_eq!(bus.response().status_code.as_u16(), 204);
        assert_eq!(github.ref_sha("staging").as_deref(), Some("abc"));
        let calls = github.calls();
        assert!(calls.contains(&Call::UpdateRef {
            branch: "staging".to_string(),
            sha: "abc".to_string(),
            force: false,
        }));
        let Some(Call::CreateCommitStatus { status, .. }) = calls.last() else {
            panic!("{calls:?}")
        };
        assert_eq!(status.state, CommitState::Success);
    }

    #[tokio::test]
    async fn test_fast_forward_failure_reports_error() {
        let github = Arc::new(
            FakeGitHub::default()
                .with_pull_request(pull_request(7, "main", "staging", "abc"))
                .failing("update_ref"),
        );
        let processor = processor(github.clone());
        let bus =
            deliver(&processor, "status", json!({ "sha": "abc", "state": "success" })).await;
        assert_eq!(bus.status, EventStatus::Error);
        let response = bus.response();
        assert_eq!(response.status_code.as_u16(), 500);
        assert!(response.body.starts_with("Failed to process status event"), "{}", response.body);
        let Some(Call::CreateCommitStatus { status, .. }) = github.calls().pop() else {
            panic!("no commit status")
        };
        assert_eq!(status.state, CommitState::Error);
    }

    #[tokio::test]
    async fn test_deadline_expiry_still_reports_error() {
        let github = Arc::new(
            FakeGitHub::default()
                .with_pull_request(pull_request(7, "main", "staging", "abc"))
                .with_latency(Duration::from_millis(10))
                .hanging("update_ref"),
        );
        let processor = processor_with_timeout(github.clone(), Duration::from_millis(200));
        let bus =
            deliver(&processor, "status", json!({ "sha": "abc", "state": "success" })).await;
        assert_eq!(bus.status, EventStatus::Error);
        let response = bus.response();
        assert_eq!(response.status_code.as_u16(), 500);
        assert!(response.body.contains("Request deadline exceeded"), "{}", response.body);
        assert_eq!(github.ref_sha("staging"), None);
        let Some(Call::CreateCommitStatus { status, .. }) = github.calls().pop() else {
            panic!("no commit status")
        };
        assert_eq!(status.state, CommitState::Error);
    }

    #[tokio::test]
    async fn test_custom_stages_from_repository_properties() {
        let github = Arc::new(FakeGitHub::default());
        let processor = processor(github.clone());
        let bus = deliver(
            &processor,
            "push",
            json!({
                "ref": "refs/heads/dev",
                "before": "000",
                "after": "abc",
                "repository": {
                    "full_name": "octo/app",
                    "owner": { "login": "octo" },
                    "custom_properties": { "promotion-stages": "dev,qa,prod" },
                },
            }),
        )
        .await;
        assert_eq!(bus.status, EventStatus::Pending);
        assert_eq!(bus.context.base_ref(), Some("qa"));
        assert_eq!(bus.context.promoter().progress("dev"), "1/3");
    }

    #[test]
    fn test_from_config() {
        let processor = Processor::from_config(&Config::default()).unwrap();
        assert!(!processor.credentials().is_loaded());
        assert_eq!(processor.handlers.len(), EventType::variants().len());

        let mut config = Config::default();
        config.feedback.check_run.template = Some("/nonexistent/check_run.md".into());
        assert!(Processor::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_authentication_failure_has_no_bus() {
        let processor = processor(Arc::new(FakeGitHub::default()));
        let body = with_repository(br#"{"sha":"abc","state":"success"}"#);
        let headers = signed_headers("status", &body, "wrong secret");
        let result = processor.process(Bytes::from(body), &headers).await;
        assert!(matches!(result, Err(ref e) if e.status_code().as_u16() == 403));
    }
}
