//! Decides when to run the executor.
//!
//! Mount, connectivity and lifecycle signals arrive independently and may
//! race. The in-flight flag and the minimum interval between completed
//! attempts keep them from producing redundant network calls.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::{RemoteEndpoint, RetryPolicy, SyncExecutor, SyncOutcome, SyncSummary};
use crate::db::KeyValueStore;

/// Source of an attempt, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Mount,
    Connectivity,
    Foreground,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mount => "mount",
            Self::Connectivity => "connectivity",
            Self::Foreground => "foreground",
            Self::Manual => "manual",
        })
    }
}

/// Network state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub connected: bool,
    /// `Some(false)` when the platform knows the internet is unreachable
    pub reachable: Option<bool>,
}

impl Connectivity {
    pub const fn online() -> Self {
        Self {
            connected: true,
            reachable: Some(true),
        }
    }

    pub const fn offline() -> Self {
        Self {
            connected: false,
            reachable: Some(false),
        }
    }

    /// Connected and not known-unreachable
    pub const fn is_usable(&self) -> bool {
        self.connected && !matches!(self.reachable, Some(false))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Active,
    Inactive,
    Background,
}

/// What a signal led to. Never an error: failures are summarized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The signal does not call for an attempt
    Ignored,
    /// An attempt is already running
    InFlight,
    /// Too soon after the last completed attempt
    Throttled { retry_in: Duration },
    Completed(SyncSummary),
    /// Local storage failed while reconciling
    LocalFailure(String),
}

#[derive(Debug, Default)]
struct TriggerState {
    last_attempt_at: Option<Instant>,
    interval: Option<Duration>,
    consecutive_failures: u32,
    mounted: bool,
    online: Option<bool>,
    lifecycle: Option<AppLifecycle>,
}

/// Owns an executor and gates access to it.
pub struct TriggerController<S, E> {
    executor: SyncExecutor<S, E>,
    min_interval: Duration,
    in_flight: AtomicBool,
    state: Mutex<TriggerState>,
}

/// Clears the in-flight flag when an attempt returns or is cancelled.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: KeyValueStore, E: RemoteEndpoint> TriggerController<S, E> {
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(15);

    pub fn new(executor: SyncExecutor<S, E>) -> Self {
        Self {
            executor,
            min_interval: Self::DEFAULT_MIN_INTERVAL,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(TriggerState::default()),
        }
    }

    #[must_use]
    pub const fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub const fn executor(&self) -> &SyncExecutor<S, E> {
        &self.executor
    }

    /// Consecutive attempts that did not finish cleanly
    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    /// Fires once per controller.
    pub async fn on_mount(&self) -> TriggerOutcome {
        let first = {
            let mut state = self.state();
            !std::mem::replace(&mut state.mounted, true)
        };
        if first {
            self.attempt(SyncTrigger::Mount).await
        } else {
            TriggerOutcome::Ignored
        }
    }

    /// Fires when the network becomes usable. The first report counts as a change.
    pub async fn on_connectivity_change(&self, connectivity: Connectivity) -> TriggerOutcome {
        let usable = connectivity.is_usable();
        let previous = self.state().online.replace(usable);
        if usable && previous != Some(true) {
            self.attempt(SyncTrigger::Connectivity).await
        } else {
            TriggerOutcome::Ignored
        }
    }

    /// Fires on a transition into the foreground.
    pub async fn on_lifecycle_change(&self, lifecycle: AppLifecycle) -> TriggerOutcome {
        let previous = self.state().lifecycle.replace(lifecycle);
        if lifecycle == AppLifecycle::Active && previous != Some(AppLifecycle::Active) {
            self.attempt(SyncTrigger::Foreground).await
        } else {
            TriggerOutcome::Ignored
        }
    }

    /// Explicit request, subject to the same guards as the signals.
    pub async fn attempt_sync(&self) -> TriggerOutcome {
        self.attempt(SyncTrigger::Manual).await
    }

    async fn attempt(&self, trigger: SyncTrigger) -> TriggerOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%trigger, "Sync attempt already in flight");
            return TriggerOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(retry_in) = self.throttled_for() {
            tracing::debug!(%trigger, ?retry_in, "Sync attempt throttled");
            return TriggerOutcome::Throttled { retry_in };
        }

        tracing::info!(%trigger, "Starting sync attempt");
        let outcome = match self.executor.execute().await {
            Ok(SyncOutcome::AlreadyRunning) => return TriggerOutcome::InFlight,
            Ok(SyncOutcome::Finished(summary)) => TriggerOutcome::Completed(summary),
            Err(error) => {
                tracing::error!(%trigger, %error, "Sync attempt failed locally");
                TriggerOutcome::LocalFailure(error.to_string())
            }
        };

        let succeeded = matches!(&outcome, TriggerOutcome::Completed(summary) if summary.ok);
        self.complete(succeeded);
        outcome
    }

    fn throttled_for(&self) -> Option<Duration> {
        let state = self.state();
        let last = state.last_attempt_at?;
        let interval = state.interval.unwrap_or(self.min_interval);
        interval.checked_sub(last.elapsed()).filter(|rest| !rest.is_zero())
    }

    fn complete(&self, succeeded: bool) {
        let mut state = self.state();
        state.last_attempt_at = Some(Instant::now());
        if succeeded {
            state.consecutive_failures = 0;
            state.interval = None;
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let backoff = self
                .executor
                .retry_policy()
                .delay_for_failures(state.consecutive_failures)
                .max(self.min_interval);
            state.interval = Some(RetryPolicy::with_jitter(backoff, &mut rand::rng()));
            tracing::debug!(
                failures = state.consecutive_failures,
                interval = ?state.interval,
                "Widened sync interval after failure"
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
