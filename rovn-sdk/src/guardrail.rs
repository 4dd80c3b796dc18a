//! Guardrail cache.
//!
//! Holds the last fetched guardrail list for a fixed TTL. A snapshot whose
//! age is at least the TTL is stale and is refreshed before it is trusted;
//! the refresh is single-flight, so concurrent callers share one fetch.
//!
//! A failed refresh leaves the previous snapshot in place. It stays readable
//! through [`GuardrailCache::snapshot`] for callers that accept stale data,
//! but [`GuardrailCache::remaining`] never answers from it past the TTL.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RovnError;
use crate::types::Guardrail;

/// Immutable guardrail list plus its capture time.
#[derive(Debug, Clone)]
pub struct GuardrailSnapshot {
    guardrails: Vec<Guardrail>,
    captured_at: Instant,
}

impl GuardrailSnapshot {
    #[must_use]
    pub fn guardrails(&self) -> &[Guardrail] {
        &self.guardrails
    }

    #[must_use]
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Whether the snapshot is at least `ttl` old.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.captured_at.elapsed() >= ttl
    }

    /// `limit_value - current_value` of the first guardrail for `metric`.
    #[must_use]
    pub fn remaining(&self, metric: &str) -> Option<i64> {
        self.guardrails
            .iter()
            .find(|g| g.metric == metric)
            .map(Guardrail::remaining)
    }
}

/// TTL-bounded, instance-scoped guardrail cache.
#[derive(Debug)]
pub struct GuardrailCache {
    ttl: Duration,
    current: ArcSwapOption<GuardrailSnapshot>,
    refresh: tokio::sync::Mutex<()>,
}

impl GuardrailCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: ArcSwapOption::empty(),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remaining allowance for `metric`, refreshing through `fetch` when the
    /// snapshot is missing or stale. `None` if no guardrail matches.
    ///
    /// # Errors
    ///
    /// Returns the error from `fetch` when a refresh was needed and failed.
    pub async fn remaining<F, Fut>(&self, metric: &str, fetch: F) -> Result<Option<i64>, RovnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Guardrail>, RovnError>>,
    {
        let snapshot = self.get_or_refresh(fetch).await?;
        Ok(snapshot.remaining(metric))
    }

    /// Fresh snapshot, refreshing through `fetch` if needed.
    ///
    /// # Errors
    ///
    /// Returns the error from `fetch`; the previous snapshot is kept.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<Arc<GuardrailSnapshot>, RovnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Guardrail>, RovnError>>,
    {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        debug!(ttl_secs = self.ttl.as_secs(), "Refreshing guardrail snapshot");
        match fetch().await {
            Ok(guardrails) => Ok(self.store(guardrails)),
            Err(e) => {
                warn!(error = %e, "Guardrail refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Replace the snapshot wholesale.
    pub fn store(&self, guardrails: Vec<Guardrail>) -> Arc<GuardrailSnapshot> {
        let snapshot = Arc::new(GuardrailSnapshot {
            guardrails,
            captured_at: Instant::now(),
        });
        self.current.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// The held snapshot regardless of age.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<GuardrailSnapshot>> {
        self.current.load_full()
    }

    /// Drop the held snapshot so the next lookup refreshes.
    pub fn invalidate(&self) {
        self.current.store(None);
    }

    fn fresh(&self) -> Option<Arc<GuardrailSnapshot>> {
        self.current
            .load_full()
            .filter(|s| !s.is_stale(self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guardrail(metric: &str, limit: i64, current: i64) -> Guardrail {
        serde_json::from_value(serde_json::json!({
            "metric": metric,
            "limit_value": limit,
            "current_value": current
        }))
        .unwrap()
    }

    fn counting_fetch(
        calls: Arc<AtomicU32>,
    ) -> impl Future<Output = Result<Vec<Guardrail>, RovnError>> {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![guardrail("tokens", 1000, 250), guardrail("cost", 50, 60)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_for_known_and_unknown_metric() {
        let cache = GuardrailCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        assert_eq!(
            cache.remaining("tokens", || counting_fetch(Arc::clone(&calls))).await.unwrap(),
            Some(750)
        );
        assert_eq!(
            cache.remaining("unknown_metric", || counting_fetch(Arc::clone(&calls))).await.unwrap(),
            None
        );
        // Overspent guardrails go negative.
        assert_eq!(
            cache.remaining("cost", || counting_fetch(Arc::clone(&calls))).await.unwrap(),
            Some(-10)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_fetch_per_ttl_window() {
        let cache = GuardrailCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..10 {
            cache.remaining("tokens", || counting_fetch(Arc::clone(&calls))).await.unwrap();
            tokio::time::advance(Duration::from_secs(5)).await;
        }
        // 50s elapsed: still inside the first window.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        cache.remaining("tokens", || counting_fetch(Arc::clone(&calls))).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_stale_at_exactly_ttl() {
        let cache = GuardrailCache::new(Duration::from_secs(60));
        cache.store(vec![guardrail("tokens", 10, 0)]);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!cache.snapshot().unwrap().is_stale(cache.ttl()));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.snapshot().unwrap().is_stale(cache.ttl()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_error_propagates_and_keeps_snapshot() {
        let cache = GuardrailCache::new(Duration::from_secs(60));
        cache.store(vec![guardrail("tokens", 1000, 250)]);
        tokio::time::advance(Duration::from_secs(61)).await;

        let result = cache
            .remaining("tokens", || async {
                Err(RovnError::Network {
                    message: "connection refused".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(RovnError::Network { .. })));

        // Stale data is still available on explicit request.
        let snapshot = cache.snapshot().unwrap();
        assert_eq!(snapshot.remaining("tokens"), Some(750));
        assert!(snapshot.is_stale(cache.ttl()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = GuardrailCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let slow_fetch = {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(vec![guardrail("tokens", 1000, 250)])
                }
            }
        };

        let (a, b, c) = tokio::join!(
            cache.remaining("tokens", slow_fetch.clone()),
            cache.remaining("tokens", slow_fetch.clone()),
            cache.remaining("tokens", slow_fetch),
        );
        assert_eq!(a.unwrap(), Some(750));
        assert_eq!(b.unwrap(), Some(750));
        assert_eq!(c.unwrap(), Some(750));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = GuardrailCache::new(Duration::from_secs(60));
        assert!(cache.snapshot().is_none());
        cache.store(Vec::new());
        assert!(cache.snapshot().is_some());
        cache.invalidate();
        assert!(cache.snapshot().is_none());
    }
}
