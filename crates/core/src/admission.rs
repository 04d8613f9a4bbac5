//! Per-environment admission control for outbound ERP traffic.
//!
//! The remote ERP enforces an independent throughput ceiling for every
//! logical environment, so each environment gets its own token bucket.
//! [`AdmissionController`] owns the bucket cache: it is created once at
//! startup, shared via `Arc`, and handed to every component that talks to
//! the ERP. Buckets are built lazily on first use from a [`BudgetSource`]
//! and discarded one environment at a time by [`AdmissionController::reload`].

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// RateBudget
// ---------------------------------------------------------------------------

/// Token-bucket parameters for one environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudget {
    /// Tokens added per second (continuous refill).
    pub refill_rate_per_second: f64,
    /// Maximum tokens the bucket can hold; also the initial fill.
    pub burst_capacity: u32,
}

/// Slowest accepted refill rate: one token every ~11.5 days.
pub const MIN_REFILL_RATE_PER_SECOND: f64 = 1e-6;

/// Budget used when no configuration exists for an environment.
pub const DEFAULT_BUDGET: RateBudget = RateBudget {
    refill_rate_per_second: 10.0,
    burst_capacity: 10,
};

impl RateBudget {
    /// Build a validated budget.
    pub fn new(refill_rate_per_second: f64, burst_capacity: u32) -> Result<Self, CoreError> {
        if !refill_rate_per_second.is_finite() || refill_rate_per_second <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Refill rate must be a positive number, got {refill_rate_per_second}"
            )));
        }
        if refill_rate_per_second < MIN_REFILL_RATE_PER_SECOND {
            return Err(CoreError::Validation(format!(
                "Refill rate must be at least {MIN_REFILL_RATE_PER_SECOND} per second, got {refill_rate_per_second}"
            )));
        }
        if burst_capacity == 0 {
            return Err(CoreError::Validation(
                "Burst capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            refill_rate_per_second,
            burst_capacity,
        })
    }

    /// Parse `"<rate>/<burst>"` (e.g. `"5/10"`). A bare `"<rate>"` uses a
    /// burst equal to the rate rounded up.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        let (rate_part, burst_part) = match raw.split_once('/') {
            Some((rate, burst)) => (rate.trim(), Some(burst.trim())),
            None => (raw, None),
        };

        let rate: f64 = rate_part
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid refill rate in '{raw}'")))?;

        let burst: u32 = match burst_part {
            Some(b) => b
                .parse()
                .map_err(|_| CoreError::Validation(format!("Invalid burst capacity in '{raw}'")))?,
            None => rate.ceil().max(1.0) as u32,
        };

        Self::new(rate, burst)
    }

    /// Time for one token to accrue.
    pub fn refill_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.refill_rate_per_second).unwrap_or(Duration::MAX)
    }

    /// The equivalent [`governor`] quota.
    pub fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.burst_capacity).unwrap_or(NonZeroU32::MIN);
        let period = self.refill_interval().max(Duration::from_nanos(1));
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(burst)
    }
}

// ---------------------------------------------------------------------------
// Budget sources
// ---------------------------------------------------------------------------

/// Where budgets come from. Consulted once per environment until reloaded.
pub trait BudgetSource: Send + Sync {
    fn load(&self, environment: &str) -> Result<RateBudget, CoreError>;
}

/// Reads budgets from the process environment.
///
/// | Env Var            | Meaning                                  |
/// |--------------------|------------------------------------------|
/// | `ERP_RATE_<ENV>`   | budget for one environment, e.g. `5/10`  |
/// | `ERP_RATE_DEFAULT` | budget for environments without override |
///
/// `<ENV>` is the environment id upper-cased with non-alphanumerics
/// replaced by `_`. Falls back to [`DEFAULT_BUDGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvBudgetSource;

impl EnvBudgetSource {
    pub fn env_key(environment: &str) -> String {
        let suffix: String = environment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("ERP_RATE_{suffix}")
    }
}

impl BudgetSource for EnvBudgetSource {
    fn load(&self, environment: &str) -> Result<RateBudget, CoreError> {
        let raw = std::env::var(Self::env_key(environment))
            .or_else(|_| std::env::var("ERP_RATE_DEFAULT"));
        match raw {
            Ok(raw) => RateBudget::parse(&raw),
            Err(_) => Ok(DEFAULT_BUDGET),
        }
    }
}

/// Fixed budgets, useful for tests and local runs.
#[derive(Debug, Clone)]
pub struct StaticBudgetSource {
    default: RateBudget,
    overrides: HashMap<String, RateBudget>,
}

impl StaticBudgetSource {
    pub fn new(default: RateBudget) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, environment: impl Into<String>, budget: RateBudget) -> Self {
        self.overrides.insert(environment.into(), budget);
        self
    }
}

impl BudgetSource for StaticBudgetSource {
    fn load(&self, environment: &str) -> Result<RateBudget, CoreError> {
        Ok(self
            .overrides
            .get(environment)
            .copied()
            .unwrap_or(self.default))
    }
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

/// [`governor`] clock that reads `tokio::time`, so refill follows the
/// runtime clock (including a paused test clock).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

type EnvLimiter =
    RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>;

/// One environment's limiter. Starts full.
pub struct TokenBucket {
    budget: RateBudget,
    limiter: EnvLimiter,
}

impl TokenBucket {
    pub fn new(budget: RateBudget) -> Self {
        Self {
            budget,
            limiter: RateLimiter::direct_with_clock(budget.quota(), &TokioClock),
        }
    }

    pub fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Take one token, or return how long until the next one accrues.
    pub fn try_take(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(TokioClock.now()))
    }
}

// ---------------------------------------------------------------------------
// AdmissionController
// ---------------------------------------------------------------------------

/// Errors from [`AdmissionController::acquire`].
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The caller's cancellation token fired before a permit was granted.
    #[error("Admission to environment '{environment}' cancelled while waiting for a permit")]
    Cancelled { environment: String },

    /// The environment's budget could not be loaded from configuration.
    #[error("Rate budget for environment '{environment}' is invalid: {source}")]
    Budget {
        environment: String,
        #[source]
        source: CoreError,
    },
}

/// Per-environment rate limiter cache.
///
/// Reads vastly outnumber writes (a write only happens on first use of an
/// environment or on reload), hence the `RwLock`.
pub struct AdmissionController {
    source: Arc<dyn BudgetSource>,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

impl AdmissionController {
    pub fn new(source: Arc<dyn BudgetSource>) -> Self {
        Self {
            source,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Wait for a permit for `environment`.
    ///
    /// Suspends only the calling task. Returns
    /// [`AdmissionError::Cancelled`] as soon as `cancel` fires, even if a
    /// token would become available later.
    pub async fn acquire(
        &self,
        environment: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AdmissionError> {
        if cancel.is_cancelled() {
            return Err(AdmissionError::Cancelled {
                environment: environment.to_string(),
            });
        }

        let bucket = self.bucket(environment).await?;

        loop {
            let wait = match bucket.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            tracing::trace!(
                environment,
                wait_ms = wait.as_millis() as u64,
                "Waiting for admission permit",
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AdmissionError::Cancelled {
                        environment: environment.to_string(),
                    });
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take a permit only if one is available right now.
    pub async fn try_acquire(&self, environment: &str) -> bool {
        match self.bucket(environment).await {
            Ok(bucket) => bucket.try_take().is_ok(),
            Err(e) => {
                tracing::warn!(environment, error = %e, "Admission denied");
                false
            }
        }
    }

    /// Discard the cached budget so the next use reloads configuration.
    ///
    /// Returns `true` if a budget was cached. Callers already waiting on
    /// the old bucket finish against it.
    pub async fn reload(&self, environment: &str) -> bool {
        let removed = self.buckets.write().await.remove(environment).is_some();
        tracing::info!(environment, removed, "Rate budget reload requested");
        removed
    }

    /// Environments with a cached budget, sorted.
    pub async fn cached_environments(&self) -> Vec<String> {
        let mut envs: Vec<String> = self.buckets.read().await.keys().cloned().collect();
        envs.sort();
        envs
    }

    /// Fetch or lazily create the bucket for `environment`.
    ///
    /// Double-checked: optimistic read, then a write lock with a second
    /// lookup so concurrent first use constructs exactly one bucket.
    async fn bucket(&self, environment: &str) -> Result<Arc<TokenBucket>, AdmissionError> {
        if let Some(bucket) = self.buckets.read().await.get(environment) {
            return Ok(Arc::clone(bucket));
        }

        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.get(environment) {
            return Ok(Arc::clone(bucket));
        }

        let budget = self
            .source
            .load(environment)
            .map_err(|source| AdmissionError::Budget {
                environment: environment.to_string(),
                source,
            })?;

        tracing::info!(
            environment,
            refill_rate_per_second = budget.refill_rate_per_second,
            burst_capacity = budget.burst_capacity,
            "Rate budget loaded",
        );

        let bucket = Arc::new(TokenBucket::new(budget));
        buckets.insert(environment.to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
