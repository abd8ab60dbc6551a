//! One circuit breaker per remote dependency.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, Clock, ConfigResult, SystemClock,
};

/// Registry of named circuit breakers.
///
/// Every caller asking for the same dependency name gets a handle onto the
/// same breaker, so failures seen by one service open the circuit for all of
/// them. The registry is an ordinary value passed to whoever needs it.
#[derive(Debug, Clone)]
pub struct BreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: Arc<DashMap<String, CircuitBreaker<C>>>,
    clock: C,
}

impl BreakerRegistry<SystemClock> {
    /// Empty registry on the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for BreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> BreakerRegistry<C> {
    /// Registry whose breakers read time from `clock`
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: Arc::new(DashMap::new()), clock }
    }

    /// Breaker for `name`, created with `config` on first use.
    ///
    /// Later calls return the existing breaker and ignore `config`.
    pub fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(existing.clone());
        }

        let entry = self.breakers.entry(name.to_string());
        let breaker = match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let breaker = CircuitBreaker::with_clock(name, config, self.clock.clone())?;
                debug!(breaker = name, "registered circuit breaker");
                vacant.insert(breaker).clone()
            }
        };
        Ok(breaker)
    }

    /// Existing breaker for `name`
    pub fn get(&self, name: &str) -> Option<CircuitBreaker<C>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    /// Snapshots of every registered breaker, sorted by name
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker is registered yet
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::circuit_breaker::{CircuitState, MockClock};
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(5),
            success_threshold: 1,
        }
    }

    /// Validates that handles with the same name share one breaker.
    ///
    /// Assertions:
    /// - A failure recorded through one handle opens the other.
    /// - Distinct names stay independent.
    #[test]
    fn same_name_shares_state() {
        let registry = BreakerRegistry::with_clock(MockClock::new());
        let a = registry.get_or_create("sink-api", config()).expect("breaker");
        let b = registry.get_or_create("sink-api", config()).expect("breaker");
        let other = registry.get_or_create("identity-provider", config()).expect("breaker");

        assert!(a.try_acquire());
        a.record_failure();

        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(other.state(), CircuitState::Closed);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn snapshots_are_sorted_by_name() {
        let registry = BreakerRegistry::new();
        registry.get_or_create("sink-api", config()).expect("breaker");
        registry.get_or_create("identity-provider", config()).expect("breaker");
        registry.get_or_create("remote-mailbox-api", config()).expect("breaker");

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["identity-provider", "remote-mailbox-api", "sink-api"]);
        assert!(registry.get("sink-api").is_some());
        assert!(registry.get("unknown").is_none());
    }
}
