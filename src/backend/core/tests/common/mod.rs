//! Shared fixtures: scripted providers and an in-memory Herald.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use fake::{faker::lorem::en::Sentence, Fake};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use herald_core::breaker::{BreakerConfig, BreakerRegistry, GENERATOR, NOTIFIER, PUBLISHER};
use herald_core::clock::ManualClock;
use herald_core::error::{ErrorCode, HeraldError, Result};
use herald_core::jobs::{Dispatcher, DispatcherConfig, InMemoryQueueBackend};
use herald_core::posts::{InMemoryPostStore, PostId};
use herald_core::providers::{
    ApprovalNotifier, ContentGenerator, Delivery, Generation, Publication, Publisher,
};
use herald_core::services::{Backends, Providers, ServiceSettings, Services};

// ============================================================================
// Scripted providers
// ============================================================================

/// Fails the next `n` calls, then succeeds.
#[derive(Debug, Default)]
pub struct Script {
    failures: Mutex<VecDeque<ErrorCode>>,
    calls: AtomicUsize,
}

impl Script {
    pub fn fail_next(&self, n: usize, code: ErrorCode) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(code).take(n));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<usize> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.failures.lock().pop_front() {
            Some(code) => Err(HeraldError::new(code, "scripted failure")),
            None => Ok(n),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    pub script: Script,
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        self.script.next()?;
        let body: String = Sentence(4..10).fake();
        Ok(Generation {
            content: body,
            provider: "scripted".into(),
            model: "scripted-1".into(),
            raw_output: serde_json::json!({ "prompt": prompt }),
        })
    }
}

#[derive(Debug, Default)]
pub struct ScriptedNotifier {
    pub script: Script,
    pub sent: Mutex<Vec<PostId>>,
}

#[async_trait]
impl ApprovalNotifier for ScriptedNotifier {
    async fn send(&self, post_id: PostId, _content: &str, platform: &str) -> Result<Delivery> {
        let n = self.script.next()?;
        self.sent.lock().push(post_id);
        Ok(Delivery {
            metadata: serde_json::json!({ "channel": "#approvals", "platform": platform, "seq": n }),
        })
    }
}

#[derive(Debug, Default)]
pub struct ScriptedPublisher {
    pub script: Script,
    pub published: Mutex<Vec<String>>,
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(&self, content: &str) -> Result<Publication> {
        let n = self.script.next()?;
        self.published.lock().push(content.to_string());
        Ok(Publication {
            external_ref: format!("tweet-{}", n),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub services: Services,
    pub clock: Arc<ManualClock>,
    pub queue_backend: InMemoryQueueBackend,
    pub posts: InMemoryPostStore,
    pub generator: Arc<ScriptedGenerator>,
    pub notifier: Arc<ScriptedNotifier>,
    pub publisher: Arc<ScriptedPublisher>,
}

impl Harness {
    /// In-memory Herald with 30s base backoff, 3 retries and breakers that
    /// stay closed unless a test lowers their threshold.
    pub fn new() -> Self {
        Self::with_breaker_threshold(1_000)
    }

    pub fn with_breaker_threshold(failure_threshold: u32) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let queue_backend = InMemoryQueueBackend::new();
        let posts = InMemoryPostStore::new();

        let generator = Arc::new(ScriptedGenerator::default());
        let notifier = Arc::new(ScriptedNotifier::default());
        let publisher = Arc::new(ScriptedPublisher::default());

        let breakers = Arc::new(BreakerRegistry::new());
        for name in [GENERATOR, NOTIFIER, PUBLISHER] {
            breakers.register(BreakerConfig::new(name).with_failure_threshold(failure_threshold));
        }

        let generator_dyn: Arc<dyn ContentGenerator> = generator.clone();
        let notifier_dyn: Arc<dyn ApprovalNotifier> = notifier.clone();
        let publisher_dyn: Arc<dyn Publisher> = publisher.clone();

        let services = Services::new(
            ServiceSettings::default(),
            Backends {
                queue: Arc::new(queue_backend.clone()),
                posts: Arc::new(posts.clone()),
            },
            Providers {
                generator: generator_dyn,
                notifier: notifier_dyn,
                publisher: publisher_dyn,
            },
            breakers,
            clock.clone(),
        );

        Self {
            services,
            clock,
            queue_backend,
            posts,
            generator,
            notifier,
            publisher,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.services.dispatcher(DispatcherConfig::default())
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}
