//! Bounded readiness polling.
//!
//! A health gate polls a readiness predicate a fixed number of times with a
//! fixed sleep between polls. There is no backoff: `max_attempts` ×
//! `interval_seconds` is the worst-case wait.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// `max_attempts` is the total number of polls, not retries after the first.
/// `max_attempts = 0` polls nothing and times out immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval() -> u64 {
    10
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_seconds: default_interval(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_seconds: interval.as_secs(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Readiness {
    /// 1-indexed attempt on which the predicate first held.
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Readiness::Ready { attempts } | Readiness::TimedOut { attempts } => *attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

/// Suspension used between polls. Injected so tests never wait on the clock.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

// ---------------------------------------------------------------------------
// wait_ready
// ---------------------------------------------------------------------------

/// Poll `check` until it returns true or `policy.max_attempts` polls have
/// been made. Sleeps `policy.interval()` between polls, never after the last.
///
/// `check` receives the 1-indexed attempt number.
pub async fn wait_ready<S, F, Fut>(
    sleeper: &S,
    target: &str,
    policy: &RetryPolicy,
    mut check: F,
) -> Readiness
where
    S: Sleeper,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=policy.max_attempts {
        if check(attempt).await {
            tracing::debug!(target_name = target, attempt, "ready");
            return Readiness::Ready { attempts: attempt };
        }
        tracing::debug!(
            target_name = target,
            attempt,
            max_attempts = policy.max_attempts,
            "not ready yet"
        );
        if attempt < policy.max_attempts {
            sleeper.sleep(policy.interval()).await;
        }
    }
    tracing::warn!(
        target_name = target,
        attempts = policy.max_attempts,
        "timed out waiting for readiness"
    );
    Readiness::TimedOut {
        attempts: policy.max_attempts,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
