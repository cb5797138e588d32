//! Retry policy for the dispatch loop: decides how long to wait after a
//! failed pull, and whether to keep trying at all.

use std::time::Duration;

use rand::Rng;

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub enum BackoffKind {
    /// Same delay after every failure.
    Fixed,
    /// delay = base * multiplier^(attempt - 1), capped at `max_delay`.
    Exponential { multiplier: f64, max_delay: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub kind: BackoffKind,
    /// `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
    /// Fraction of the delay (0.0..=1.0) randomly added on top.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            kind: BackoffKind::Fixed,
            max_consecutive_failures: None,
            jitter: 0.0,
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            kind: BackoffKind::Exponential { multiplier, max_delay },
            max_consecutive_failures: None,
            jitter: 0.0,
        }
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = Some(max);
        self
    }

    /// Non-finite fractions disable jitter.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Rejects values that cannot produce a delay: a multiplier below 1.0 or
    /// non-finite, or a jitter outside 0.0..=1.0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let BackoffKind::Exponential { multiplier, .. } = &self.kind
            && !(multiplier.is_finite() && *multiplier >= 1.0)
        {
            return Err(ConfigError::InvalidValue {
                key: "error_backoff.multiplier".to_string(),
                details: format!("must be a finite value >= 1.0, got {multiplier}"),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidValue {
                key: "error_backoff.jitter".to_string(),
                details: format!("must be within 0.0..=1.0, got {}", self.jitter),
            });
        }
        Ok(())
    }

    /// Delay before the retry that follows the `attempt`-th consecutive
    /// failure (1-indexed). Attempt 0 is treated like attempt 1.
    ///
    /// With base=1s, multiplier=2.0, max=8s:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    /// - attempt 4: 8s
    /// - attempt 5: 8s
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match &self.kind {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential { multiplier, max_delay } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.base_delay.as_secs_f64() * multiplier.powi(exp);
                match Duration::try_from_secs_f64(secs) {
                    Ok(delay) if delay < *max_delay => delay,
                    _ => *max_delay,
                }
            }
        }
    }

    /// `next_delay` plus jitter, if configured.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.next_delay(attempt);
        if !(self.jitter > 0.0 && self.jitter <= 1.0) {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }

    pub fn allows(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .is_none_or(|max| consecutive_failures <= max)
    }
}

/// Consecutive-failure tracker driven by the dispatch loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    consecutive: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
        }
    }

    /// Record a failure. `None` means the failure budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.policy.allows(self.consecutive) {
            Some(self.policy.jittered_delay(self.consecutive))
        } else {
            None
        }
    }

    /// Returns how many failures preceded this success.
    pub fn on_success(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}
