//! Wiring: storage backends and providers in, ready-to-run services out.
//!
//! Both the server binary and the integration tests assemble Herald through
//! [`Services::new`], so the two never drift apart.

use std::sync::Arc;
use std::time::Duration;

use crate::api::AppState;
use crate::breaker::{BreakerRegistry, GENERATOR, NOTIFIER, PUBLISHER};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, ProvidersConfig};
use crate::error::Result;
use crate::jobs::{
    Dispatcher, DispatcherConfig, Guarded, InMemoryQueueBackend, JobHandlers, JobQueue,
    QueueBackend, RetryPolicy, DEFAULT_STUCK_THRESHOLD,
};
use crate::posts::{ApprovalStateMachine, ContentService, InMemoryPostStore, PostStore};
use crate::providers::{
    ApprovalNotifier, ContentGenerator, OpenAiGenerator, Publisher, SlackNotifier,
    TwitterPublisher,
};

/// Where jobs and posts are stored.
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn QueueBackend>,
    pub posts: Arc<dyn PostStore>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            queue: Arc::new(InMemoryQueueBackend::new()),
            posts: Arc::new(InMemoryPostStore::new()),
        }
    }

    pub fn postgres(db: &crate::db::Database) -> Self {
        Self {
            queue: Arc::new(db.queue_backend()),
            posts: Arc::new(db.post_store()),
        }
    }
}

/// The three external collaborators.
#[derive(Clone)]
pub struct Providers {
    pub generator: Arc<dyn ContentGenerator>,
    pub notifier: Arc<dyn ApprovalNotifier>,
    pub publisher: Arc<dyn Publisher>,
}

impl Providers {
    /// HTTP clients for the configured services.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            generator: Arc::new(OpenAiGenerator::new(config.generator.clone())?),
            notifier: Arc::new(SlackNotifier::new(config.notifier.clone())?),
            publisher: Arc::new(TwitterPublisher::new(config.publisher.clone())?),
        })
    }
}

/// Queue and content settings that are not part of a backend.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub retry: RetryPolicy,
    pub stuck_threshold: Duration,
    pub default_platform: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            default_platform: "twitter".to_string(),
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.queue),
            stuck_threshold: config.worker.stuck_threshold,
            default_platform: config.providers.notifier.platform_label.clone(),
        }
    }
}

/// Everything the API and the dispatcher share.
#[derive(Clone)]
pub struct Services {
    pub queue: JobQueue,
    pub posts: Arc<dyn PostStore>,
    pub approvals: ApprovalStateMachine,
    pub content: ContentService,
    pub handlers: Arc<JobHandlers>,
    pub breakers: Arc<BreakerRegistry>,
    pub clock: SharedClock,
}

impl Services {
    pub fn new(
        settings: ServiceSettings,
        backends: Backends,
        providers: Providers,
        breakers: Arc<BreakerRegistry>,
        clock: SharedClock,
    ) -> Self {
        let queue = JobQueue::new(backends.queue, Arc::clone(&clock), settings.retry)
            .with_stuck_threshold(settings.stuck_threshold);
        let approvals =
            ApprovalStateMachine::new(Arc::clone(&backends.posts), queue.clone(), Arc::clone(&clock));

        let content = ContentService::new(
            providers.generator,
            breakers.get_or_default(GENERATOR),
            Arc::clone(&backends.posts),
            queue.clone(),
            Arc::clone(&clock),
            settings.default_platform,
        );

        let handlers = Arc::new(JobHandlers::new(
            approvals.clone(),
            Guarded::new(providers.notifier, breakers.get_or_default(NOTIFIER)),
            Guarded::new(providers.publisher, breakers.get_or_default(PUBLISHER)),
        ));

        Self {
            queue,
            posts: backends.posts,
            approvals,
            content,
            handlers,
            breakers,
            clock,
        }
    }

    /// Production wiring from a loaded config.
    pub fn from_config(config: &Config, backends: Backends) -> Result<Self> {
        Ok(Self::new(
            ServiceSettings::from(config),
            backends,
            Providers::from_config(&config.providers)?,
            Arc::new(BreakerRegistry::from_config(&config.breakers)),
            Arc::new(SystemClock),
        ))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            content: self.content.clone(),
            approvals: self.approvals.clone(),
            queue: self.queue.clone(),
            posts: Arc::clone(&self.posts),
            breakers: Arc::clone(&self.breakers),
        }
    }

    pub fn dispatcher(&self, config: DispatcherConfig) -> Dispatcher {
        Dispatcher::new(self.queue.clone(), Arc::clone(&self.handlers), config)
    }
}
