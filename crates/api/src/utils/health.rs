//! Process health built from per-component checks
//!
//! The daemon reports one [`ComponentHealth`] for the store, one per
//! background worker and one per circuit breaker.

use chrono::Utc;
use mailsync_common::{CircuitSnapshot, CircuitState};
use serde::{Deserialize, Serialize};

/// Share of healthy components at or above which the process is healthy
pub const HEALTHY_THRESHOLD: f64 = 0.8;

/// Overall health of the daemon
///
/// # Example
/// ```
/// use mailsync_app::utils::health::{ComponentHealth, HealthStatus};
///
/// let status = HealthStatus::from_components(vec![
///     ComponentHealth::healthy("database"),
///     ComponentHealth::unhealthy("sink-api", "circuit open"),
/// ]);
///
/// assert!((status.score - 0.5).abs() < f64::EPSILON);
/// assert!(!status.is_healthy);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,

    /// Healthy components over total components, 1.0 when there are none
    pub score: f64,

    /// Names of the failing components, when any
    pub message: Option<String>,

    pub components: Vec<ComponentHealth>,

    /// Unix seconds when the checks ran
    pub timestamp: i64,
}

impl HealthStatus {
    /// Score the components and name the failing ones
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let failing: Vec<&str> =
            components.iter().filter(|c| !c.is_healthy).map(|c| c.name.as_str()).collect();
        let score = healthy_share(components.len() - failing.len(), components.len());
        let message = (!failing.is_empty()).then(|| format!("unhealthy: {}", failing.join(", ")));

        Self {
            is_healthy: score >= HEALTHY_THRESHOLD,
            score,
            message,
            components,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Look up one component by name
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[allow(clippy::cast_precision_loss)]
fn healthy_share(healthy: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    healthy as f64 / total as f64
}

/// Health of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// e.g. "database", "transmission_worker", "sink-api"
    pub name: String,
    pub is_healthy: bool,
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, message: None }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: false, message: Some(message.into()) }
    }

    /// A worker is healthy while its task is running.
    pub fn worker(name: impl Into<String>, running: bool) -> Self {
        if running {
            Self::healthy(name)
        } else {
            Self::unhealthy(name, "not running")
        }
    }

    /// An open circuit makes its dependency unhealthy. A half-open one is
    /// healthy but annotated.
    pub fn from_circuit(snapshot: &CircuitSnapshot) -> Self {
        match snapshot.state {
            CircuitState::Closed => Self::healthy(&snapshot.name),
            CircuitState::HalfOpen => Self {
                name: snapshot.name.clone(),
                is_healthy: true,
                message: Some("half_open: probing".into()),
            },
            CircuitState::Open => {
                let open_for = snapshot.open_for.map_or(0, |d| d.as_secs());
                Self::unhealthy(
                    &snapshot.name,
                    format!(
                        "circuit open for {open_for}s after {} consecutive failures",
                        snapshot.consecutive_failures
                    ),
                )
            }
        }
    }
}
