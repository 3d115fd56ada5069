//! Fixed-window admission for sync batches and registrations.
//!
//! Sync batches are counted per device, registrations per principal. Each
//! quota keeps one window per key and sheds expired windows as it grows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use sprout_core::util::fingerprint;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::error::AppError;

/// Windows kept per quota before expired ones are swept
const SWEEP_THRESHOLD: usize = 1_024;

/// Per-key request budget over a fixed window.
struct Quota {
    name: &'static str,
    window: Duration,
    limit: u32,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    used: u32,
}

impl Quota {
    fn new(name: &'static str, window: Duration, limit: u32) -> Self {
        Self {
            name,
            window,
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Spend one unit of `key`'s budget, or report how long until it refills.
    async fn take(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, window| now.duration_since(window.opened_at) < self.window);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            opened_at: now,
            used: 0,
        });
        let age = now.duration_since(window.opened_at);
        if age >= self.window {
            *window = Window {
                opened_at: now,
                used: 0,
            };
        }

        if window.used >= self.limit {
            return Err(self.window.saturating_sub(age));
        }
        window.used += 1;
        Ok(())
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[derive(Default)]
struct Counters {
    batches_admitted: AtomicU64,
    batch_items_admitted: AtomicU64,
    batches_refused: AtomicU64,
    registrations_admitted: AtomicU64,
    registrations_refused: AtomicU64,
}

/// Admission counters reported by `/healthz`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub batches_admitted: u64,
    pub batch_items_admitted: u64,
    pub batches_refused: u64,
    pub registrations_admitted: u64,
    pub registrations_refused: u64,
}

/// Gatekeeper shared by the sync and registration handlers.
pub struct AdmissionControl {
    batches: Quota,
    registrations: Quota,
    counters: Counters,
}

impl AdmissionControl {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_batch_rate_limit_per_window,
            config.registration_rate_limit_per_window,
        )
    }

    fn new(window: Duration, batches_per_device: u32, registrations_per_principal: u32) -> Self {
        Self {
            batches: Quota::new("sync_batch", window, batches_per_device),
            registrations: Quota::new("registration", window, registrations_per_principal),
            counters: Counters::default(),
        }
    }

    /// Admit one batch of `items` actions from `device_id`.
    pub async fn admit_batch(&self, device_id: &str, items: usize) -> Result<(), AppError> {
        match self.batches.take(device_id).await {
            Ok(()) => {
                self.counters.batches_admitted.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .batch_items_admitted
                    .fetch_add(u64::try_from(items).unwrap_or(u64::MAX), Ordering::Relaxed);
                Ok(())
            }
            Err(retry_in) => {
                self.counters.batches_refused.fetch_add(1, Ordering::Relaxed);
                Err(Self::refuse(&self.batches, device_id, retry_in))
            }
        }
    }

    /// Admit one device or plant registration made on behalf of `principal_id`.
    pub async fn admit_registration(&self, principal_id: &str) -> Result<(), AppError> {
        match self.registrations.take(principal_id).await {
            Ok(()) => {
                self.counters
                    .registrations_admitted
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(retry_in) => {
                self.counters
                    .registrations_refused
                    .fetch_add(1, Ordering::Relaxed);
                Err(Self::refuse(&self.registrations, principal_id, retry_in))
            }
        }
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        AdmissionSnapshot {
            batches_admitted: load(&self.counters.batches_admitted),
            batch_items_admitted: load(&self.counters.batch_items_admitted),
            batches_refused: load(&self.counters.batches_refused),
            registrations_admitted: load(&self.counters.registrations_admitted),
            registrations_refused: load(&self.counters.registrations_refused),
        }
    }

    fn refuse(quota: &Quota, key: &str, retry_in: Duration) -> AppError {
        // Round up so clients never retry inside the window
        let retry_after_secs = retry_in.as_secs() + u64::from(retry_in.subsec_nanos() > 0);
        tracing::warn!(
            quota = quota.name,
            caller = fingerprint(key),
            retry_after_secs,
            "Admission refused"
        );
        AppError::too_many_requests(format!("too many {} requests", quota.name), retry_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn batches_are_limited_per_device_until_the_window_rolls() {
        let admission = AdmissionControl::new(Duration::from_secs(60), 2, 5);

        admission.admit_batch("dev-a", 3).await.unwrap();
        admission.admit_batch("dev-a", 1).await.unwrap();
        admission.admit_batch("dev-b", 4).await.unwrap();

        tokio::time::advance(Duration::from_millis(20_500)).await;
        let refused = admission.admit_batch("dev-a", 2).await.unwrap_err();
        assert!(matches!(refused, AppError::TooManyRequests(_, 40)));

        tokio::time::advance(Duration::from_secs(40)).await;
        admission.admit_batch("dev-a", 2).await.unwrap();

        assert_eq!(
            admission.snapshot(),
            AdmissionSnapshot {
                batches_admitted: 4,
                batch_items_admitted: 10,
                batches_refused: 1,
                ..AdmissionSnapshot::default()
            }
        );
    }

    #[tokio::test]
    async fn registrations_have_their_own_budget() {
        let admission = AdmissionControl::new(Duration::from_secs(60), 1, 1);

        admission.admit_batch("alice", 1).await.unwrap();
        admission.admit_registration("alice").await.unwrap();
        assert!(admission.admit_registration("alice").await.is_err());
        admission.admit_registration("bob").await.unwrap();

        let snapshot = admission.snapshot();
        assert_eq!(snapshot.registrations_admitted, 2);
        assert_eq!(snapshot.registrations_refused, 1);
        assert_eq!(snapshot.batches_admitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_swept() {
        let quota = Quota::new("sync_batch", Duration::from_secs(10), 1);
        for device in 0..SWEEP_THRESHOLD {
            quota.take(&format!("dev-{device}")).await.unwrap();
        }
        assert_eq!(quota.tracked_keys().await, SWEEP_THRESHOLD);

        tokio::time::advance(Duration::from_secs(10)).await;
        quota.take("dev-new").await.unwrap();
        assert_eq!(quota.tracked_keys().await, 1);
    }
}
