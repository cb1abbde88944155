//! Failure isolation for outbound calls.
//!
//! Each external dependency gets its own [`CircuitBreaker`]; the
//! [`BreakerRegistry`] owns them for the life of the process.

mod circuit_breaker;
mod registry;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState,
};
pub use registry::{BreakerRegistry, GENERATOR, NOTIFIER, PUBLISHER};
