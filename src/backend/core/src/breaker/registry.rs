//! One breaker per external dependency.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::config::BreakersConfig;

/// Breaker guarding the content generator.
pub const GENERATOR: &str = "generator";
/// Breaker guarding approval-request delivery.
pub const NOTIFIER: &str = "notifier";
/// Breaker guarding the publishing platform.
pub const PUBLISHER: &str = "publisher";

/// Owns the process-wide breakers, keyed by dependency name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the generator, notifier and publisher breakers.
    pub fn from_config(config: &BreakersConfig) -> Self {
        let registry = Self::new();
        registry.register(BreakerConfig::from_settings(GENERATOR, &config.generator));
        registry.register(BreakerConfig::from_settings(NOTIFIER, &config.notifier));
        registry.register(BreakerConfig::from_settings(PUBLISHER, &config.publisher));
        registry
    }

    /// Register a breaker, returning the existing one if the name is taken.
    pub fn register(&self, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write();
        breakers
            .entry(config.name.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Fetch a breaker, creating one with default settings if missing.
    pub fn get_or_default(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }
        self.register(BreakerConfig::new(name))
    }

    /// Snapshots of every breaker, ordered by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.read().values().map(|b| b.snapshot()).collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}
