//! Backoff delay calculation.
//!
//! [`Backoff`] is the single place retry delays are computed. Both the
//! in-call [`RetryExecutor`](super::RetryExecutor) and the persisted
//! transmission schedule use it, so the same attempt number always maps to
//! the same delay range.
//!
//! Attempts are 1-based: attempt 1 is the delay before the first retry.

use std::time::Duration;

use rand::Rng;

/// Jitter applied on top of the capped delay, as a fraction of it.
const JITTER_FRACTION: f64 = 0.1;

/// How the delay grows with the attempt number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackoffStrategy {
    /// Always `base_delay`
    Fixed,
    /// `base_delay * attempt`
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`
    Exponential,
    /// Uniformly random between `base_delay` and `max_delay`
    Random,
}

impl BackoffStrategy {
    /// Parse a strategy name as used in configuration files.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// Delay calculator shared by every retry path
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor for [`BackoffStrategy::Exponential`]
    pub multiplier: f64,
    /// Apply ±10% jitter after capping
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Exponential backoff with jitter.
    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self { strategy: BackoffStrategy::Exponential, base_delay, max_delay, multiplier, jitter: true }
    }

    /// Constant delay without jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Returns a copy with jitter disabled.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Check the parameters describe a usable schedule.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay < self.base_delay {
            return Err(format!(
                "max_delay ({:?}) must not be smaller than base_delay ({:?})",
                self.max_delay, self.base_delay
            ));
        }
        if self.strategy == BackoffStrategy::Exponential
            && (!self.multiplier.is_finite() || self.multiplier < 1.0)
        {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        Ok(())
    }

    /// Delay for `attempt` before jitter, capped at `max_delay`.
    ///
    /// `Random` draws a fresh value on every call.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
                if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    self.max_delay
                }
            }
            BackoffStrategy::Random => {
                if self.max_delay <= self.base_delay {
                    self.base_delay
                } else {
                    rand::thread_rng().gen_range(self.base_delay..=self.max_delay)
                }
            }
        };
        delay.min(self.max_delay)
    }

    /// Delay to wait before retry number `attempt`.
    ///
    /// Jitter is applied after the cap, so the result can exceed `max_delay`
    /// by at most 10%. It never goes below zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        if !self.jitter || self.strategy == BackoffStrategy::Random || raw.is_zero() {
            return raw;
        }

        let factor = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let secs = raw.as_secs_f64() * (1.0 + factor);
        Duration::from_secs_f64(secs.max(0.0))
    }
}
