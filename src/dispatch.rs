//! Rate-limited, retrying dispatch of generation calls.
//!
//! [`Dispatcher`] wraps any [`TextGenerator`] and is itself one, so the
//! summarizer and merge reducer never see retry logic. Every call passes
//! through four controls:
//!
//! 1. **Global cooldown**: a rate-limit response from any call pushes a
//!    shared "not before" instant forward; all callers wait for it.
//! 2. **Concurrency cap**: a semaphore bounds in-flight calls across all
//!    documents and chunks.
//! 3. **Deadline**: each attempt is wrapped in `tokio::time::timeout`;
//!    expiry counts as a transient failure.
//! 4. **Retry**: transient failures are retried up to `max_retries` times
//!    with exponential backoff: base, 2×base, 4×base, … capped at 32×base.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::generate::{Constraints, Prompt, TextGenerator};

/// Largest backoff exponent (2^5 = 32 × base).
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Per-call retry and deadline settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.backoff_base * (1u32 << exponent)
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub calls: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct Cooldown {
    not_before: Option<Instant>,
    strikes: u32,
}

/// A [`TextGenerator`] adapter adding the global cap, cooldown, deadline, and retries.
pub struct Dispatcher {
    inner: Arc<dyn TextGenerator>,
    permits: Semaphore,
    policy: RetryPolicy,
    cooldown: Mutex<Cooldown>,
    calls: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    timeouts: AtomicU64,
}

impl Dispatcher {
    pub fn new(inner: Arc<dyn TextGenerator>, max_concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            inner,
            permits: Semaphore::new(max_concurrency.max(1)),
            policy,
            cooldown: Mutex::new(Cooldown::default()),
            calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn from_config(inner: Arc<dyn TextGenerator>, config: &GenerationConfig) -> Self {
        Self::new(inner, config.max_concurrency, RetryPolicy::from_config(config))
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            calls: self.calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Sleep until the shared cooldown has passed. Re-checks after waking
    /// because another call may have extended it meanwhile.
    async fn wait_for_cooldown(&self) {
        loop {
            let not_before = self.lock_cooldown().not_before;
            match not_before {
                Some(at) if at > Instant::now() => tokio::time::sleep_until(at).await,
                _ => return,
            }
        }
    }

    fn record_rate_limit(&self, retry_after: Option<Duration>) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        let mut cooldown = self.lock_cooldown();
        cooldown.strikes = cooldown.strikes.saturating_add(1);
        let delay = retry_after.unwrap_or_else(|| self.policy.backoff(cooldown.strikes));
        let until = Instant::now() + delay;
        if cooldown.not_before.map_or(true, |existing| existing < until) {
            cooldown.not_before = Some(until);
        }
        warn!(
            delay_ms = delay.as_millis() as u64,
            strikes = cooldown.strikes,
            "rate limited; pausing all generation calls"
        );
    }

    fn record_success(&self) {
        let mut cooldown = self.lock_cooldown();
        cooldown.strikes = 0;
    }

    fn lock_cooldown(&self) -> std::sync::MutexGuard<'_, Cooldown> {
        // The guarded state stays consistent even if a holder panicked.
        self.cooldown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TextGenerator for Dispatcher {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        constraints: &Constraints,
    ) -> Result<String, GenerationError> {
        let mut last_err = None;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                self.retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }

            self.wait_for_cooldown().await;

            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| GenerationError::Fatal(format!("dispatcher closed: {}", e)))?;
            self.calls.fetch_add(1, Ordering::Relaxed);
            let outcome =
                tokio::time::timeout(self.policy.timeout, self.inner.generate(prompt, constraints))
                    .await;
            drop(permit);

            let err = match outcome {
                Ok(Ok(text)) => {
                    self.record_success();
                    return Ok(text);
                }
                Ok(Err(e)) if !e.is_transient() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    GenerationError::Timeout(self.policy.timeout)
                }
            };

            if let GenerationError::RateLimited { retry_after, .. } = &err {
                self.record_rate_limit(*retry_after);
            }

            if attempt < self.policy.max_retries {
                warn!(attempt = attempt + 1, error = %err, "generation attempt failed; retrying");
            } else {
                debug!(attempt = attempt + 1, error = %err, "generation retries exhausted");
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| {
            GenerationError::Transient("generation failed after retries".to_string())
        }))
    }
}
