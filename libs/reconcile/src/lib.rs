//! Reconciliation loop primitives.
//!
//! Small, clock-explicit building blocks shared by the in-container
//! entrypoint and the out-of-container orchestrator:
//!
//! - **Crash window**: classifies supervised-process exits as rapid crashes
//!   or normal session ends and derives the restart delay.
//! - **Retry policy**: fixed attempt ceiling with a fixed delay, used for
//!   transient host-level failures.
//! - **TTL cache**: a single value with the instant it was observed.
//!
//! # Invariants
//!
//! - Every decision takes `Instant` explicitly, so results are deterministic
//!   given the same inputs.
//! - The crash counter is reset only by an attempt that survives the window.

use std::time::{Duration, Instant};

// =============================================================================
// Crash window
// =============================================================================

/// Restart-delay constants for a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashPolicy {
    /// Runs shorter than this count as rapid crashes.
    pub window: Duration,

    /// Rapid-crash count at which backoff escalates.
    pub threshold: u32,

    /// Backoff added per rapid crash once the threshold is reached.
    pub backoff_step: Duration,

    /// Upper bound on the escalated backoff.
    pub max_backoff: Duration,

    /// Delay before a normal restart.
    pub restart_delay: Duration,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_CRASH_WINDOW,
            threshold: DEFAULT_CRASH_THRESHOLD,
            backoff_step: Duration::from_secs(10),
            max_backoff: Duration::from_secs(120),
            restart_delay: Duration::from_secs(3),
        }
    }
}

impl CrashPolicy {
    /// Delay to apply before the next start given the current rapid-crash count.
    pub fn delay_for(&self, rapid_crashes: u32) -> Duration {
        if rapid_crashes >= self.threshold {
            self.backoff_step
                .saturating_mul(rapid_crashes)
                .min(self.max_backoff)
        } else {
            self.restart_delay
        }
    }
}

/// How an exit was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// The attempt died inside the crash window.
    RapidCrash,

    /// The attempt survived past the crash window.
    Survived,
}

/// Rolling rapid-crash counter for one supervisor-loop invocation.
#[derive(Debug, Clone)]
pub struct CrashWindow {
    policy: CrashPolicy,
    rapid_crashes: u32,
    last_start: Option<Instant>,
}

impl CrashWindow {
    /// Create an empty crash window.
    pub fn new(policy: CrashPolicy) -> Self {
        Self {
            policy,
            rapid_crashes: 0,
            last_start: None,
        }
    }

    /// Current number of consecutive rapid crashes.
    pub fn rapid_crashes(&self) -> u32 {
        self.rapid_crashes
    }

    /// The policy this window applies.
    pub fn policy(&self) -> &CrashPolicy {
        &self.policy
    }

    /// Record that an attempt started at `now`.
    pub fn record_start(&mut self, now: Instant) {
        self.last_start = Some(now);
    }

    /// Record that the current attempt exited at `now`.
    ///
    /// Returns the classification and the delay to sleep before restarting.
    /// An exit with no recorded start counts as a rapid crash.
    pub fn record_exit(&mut self, now: Instant) -> (ExitClass, Duration) {
        let survived = self
            .last_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();

        let class = if survived < self.policy.window {
            self.rapid_crashes = self.rapid_crashes.saturating_add(1);
            ExitClass::RapidCrash
        } else {
            self.rapid_crashes = 0;
            ExitClass::Survived
        };

        (class, self.policy.delay_for(self.rapid_crashes))
    }
}

// =============================================================================
// Retry policy
// =============================================================================

/// Fixed-delay retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Whether a failure on `attempt` (1-based) may be followed by another attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// =============================================================================
// TTL cache
// =============================================================================

/// A single cached value with the instant it was stored.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(T, Instant)>,
}

impl<T: Clone> TtlCache<T> {
    /// Create an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Return the value if it was stored less than `ttl` before `now`.
    pub fn get_at(&self, now: Instant) -> Option<T> {
        match &self.entry {
            Some((value, stored_at)) if now.saturating_duration_since(*stored_at) < self.ttl => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Store a value observed at `now`.
    pub fn put_at(&mut self, value: T, now: Instant) {
        self.entry = Some((value, now));
    }

    /// Drop the cached value.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

/// Default rapid-crash window.
pub const DEFAULT_CRASH_WINDOW: Duration = Duration::from_secs(30);

/// Default rapid-crash count before backoff escalates.
pub const DEFAULT_CRASH_THRESHOLD: u32 = 5;

/// Default attempt ceiling for transient failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay between transient-failure attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
