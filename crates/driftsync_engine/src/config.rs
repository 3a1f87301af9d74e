//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use crate::model::{LoadPolicy, SavePolicy};
use crate::queue::QueueType;
use rand::Rng;
use std::time::Duration;

/// Limits of one request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Tasks allowed to execute at once.
    pub concurrency: usize,
    /// Tasks allowed to be admitted (running or waiting for a slot).
    pub capacity: usize,
    /// How long an enqueue waits for capacity before giving up.
    pub capacity_timeout: Duration,
    /// How often a waiting enqueue rechecks capacity.
    pub poll_interval: Duration,
}

impl QueueLimits {
    /// Creates queue limits with a 100ms capacity poll interval.
    pub fn new(concurrency: usize, capacity: usize, capacity_timeout: Duration) -> Self {
        Self {
            concurrency,
            capacity,
            capacity_timeout,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Sets the concurrency.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the capacity-wait timeout.
    #[must_use]
    pub fn with_capacity_timeout(mut self, timeout: Duration) -> Self {
        self.capacity_timeout = timeout;
        self
    }

    /// Sets the capacity poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Limits of all three request queues.
///
/// Foreground work has a user waiting on it, so it tolerates the longest
/// capacity wait; background work gives up soonest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// User-initiated remote-first saves.
    pub foreground: QueueLimits,
    /// Remote loads and refreshes.
    pub load: QueueLimits,
    /// Deferred sync of queued writes.
    pub background: QueueLimits,
}

impl QueueConfig {
    /// Returns the limits of one queue.
    pub fn limits(&self, queue: QueueType) -> QueueLimits {
        match queue {
            QueueType::Foreground => self.foreground,
            QueueType::Load => self.load,
            QueueType::Background => self.background,
        }
    }

    /// Sets the capacity poll interval of every queue.
    #[must_use]
    pub fn with_capacity_check_interval(mut self, interval: Duration) -> Self {
        self.foreground.poll_interval = interval;
        self.load.poll_interval = interval;
        self.background.poll_interval = interval;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            foreground: QueueLimits::new(4, 50, Duration::from_secs(30)),
            load: QueueLimits::new(3, 100, Duration::from_secs(15)),
            background: QueueLimits::new(2, 200, Duration::from_secs(5)),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of failed attempts before a row goes dead.
    pub max_attempts: u32,
    /// Delay scale for the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the backoff before jitter.
    pub max_delay: Duration,
    /// Lower bound of any delay, after jitter.
    pub min_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay, applied in both directions.
    pub jitter_percent: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            min_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter_percent: 0.2,
        }
    }

    /// Creates a configuration that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            min_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_percent: 0.0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the minimum delay.
    #[must_use]
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter_percent(mut self, jitter: f64) -> Self {
        self.jitter_percent = jitter;
        self
    }

    /// Returns true once `attempt_count` failures exhaust the budget.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }

    /// Calculates the delay before the next try, given the failure count
    /// including the failure just recorded.
    pub fn delay_for_attempt(&self, attempt_count: u32) -> Duration {
        self.delay_for_attempt_with(attempt_count, &mut rand::thread_rng())
    }

    /// Like [`Self::delay_for_attempt`], drawing jitter from `rng`.
    pub fn delay_for_attempt_with<R: Rng>(
        &self,
        attempt_count: u32,
        rng: &mut R,
    ) -> Duration {
        let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let clamped = if base.is_finite() {
            base.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };

        let jitter = self.jitter_percent.abs();
        let factor = if jitter > 0.0 {
            1.0 + rng.gen_range(-jitter..=jitter)
        } else {
            1.0
        };

        let secs = (clamped * factor).max(self.min_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(secs)
    }

    /// Returns the largest delay [`Self::delay_for_attempt`] can produce.
    pub fn delay_upper_bound(&self) -> Duration {
        let jittered = self.max_delay.as_secs_f64() * (1.0 + self.jitter_percent.abs());
        Duration::from_secs_f64(jittered.max(self.min_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for a sync context.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Request queue limits.
    pub queues: QueueConfig,
    /// Retry behavior.
    pub retry: RetryConfig,
    /// Save policy of repositories that do not override it.
    pub default_save_policy: SavePolicy,
    /// Load policy of repositories that do not override it.
    pub default_load_policy: LoadPolicy,
    /// Retry executor scan interval while the app is in the foreground.
    pub foreground_poll_interval: Duration,
    /// Retry executor scan interval while the app is in the background.
    pub background_poll_interval: Duration,
    /// Keep synced sync queue rows instead of deleting them.
    pub retain_synced_items: bool,
    /// Let remote-first loads fall back to the local store on failure.
    pub fallback_to_local: bool,
    /// Maximum sync queue rows examined per executor pass.
    pub scan_batch_size: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            queues: QueueConfig::default(),
            retry: RetryConfig::default(),
            default_save_policy: SavePolicy::default(),
            default_load_policy: LoadPolicy::default(),
            foreground_poll_interval: Duration::from_secs(30),
            background_poll_interval: Duration::from_secs(15 * 60),
            retain_synced_items: true,
            fallback_to_local: false,
            scan_batch_size: 500,
        }
    }

    /// Sets the queue limits.
    #[must_use]
    pub fn with_queues(mut self, queues: QueueConfig) -> Self {
        self.queues = queues;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default save policy.
    #[must_use]
    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.default_save_policy = policy;
        self
    }

    /// Sets the default load policy.
    #[must_use]
    pub fn with_load_policy(mut self, policy: LoadPolicy) -> Self {
        self.default_load_policy = policy;
        self
    }

    /// Sets the foreground and background scan intervals.
    #[must_use]
    pub fn with_poll_intervals(mut self, foreground: Duration, background: Duration) -> Self {
        self.foreground_poll_interval = foreground;
        self.background_poll_interval = background;
        self
    }

    /// Sets whether synced rows are kept.
    #[must_use]
    pub fn with_retain_synced_items(mut self, retain: bool) -> Self {
        self.retain_synced_items = retain;
        self
    }

    /// Sets whether remote-first loads fall back to the local store.
    #[must_use]
    pub fn with_fallback_to_local(mut self, fallback: bool) -> Self {
        self.fallback_to_local = fallback;
        self
    }

    /// Sets the scan batch size.
    #[must_use]
    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Checks that every limit is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the first bad option.
    pub fn validate(&self) -> SyncResult<()> {
        for queue in QueueType::ALL {
            let limits = self.queues.limits(queue);
            if limits.concurrency == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{queue} queue concurrency must be at least 1"
                )));
            }
            if limits.capacity < limits.concurrency {
                return Err(SyncError::InvalidConfig(format!(
                    "{queue} queue capacity ({}) is below its concurrency ({})",
                    limits.capacity, limits.concurrency
                )));
            }
            if limits.poll_interval.is_zero() {
                return Err(SyncError::InvalidConfig(format!(
                    "{queue} queue capacity check interval must be positive"
                )));
            }
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max retry attempts must be at least 1".into(),
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "backoff multiplier must be a finite number >= 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&retry.jitter_percent) {
            return Err(SyncError::InvalidConfig(
                "jitter percent must be in [0, 1)".into(),
            ));
        }
        if retry.min_delay > retry.max_delay {
            return Err(SyncError::InvalidConfig(
                "min retry delay exceeds max retry delay".into(),
            ));
        }
        if self.foreground_poll_interval.is_zero() || self.background_poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "executor poll intervals must be positive".into(),
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "scan batch size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
