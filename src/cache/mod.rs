//! The forecast cache.
//!
//! [`ForecastCache`] owns the single cached forecast and decides, per call,
//! whether it can be served or has to be refreshed from the upstream
//! [`ForecastSource`].
//!
//! ## Validity
//!
//! An entry is valid while `now - fetched_at < ttl`. At exactly `ttl` it is
//! expired. There is no background refresh: the first caller after expiry
//! pays for the upstream round-trip.
//!
//! ## Concurrency
//!
//! The slot holds an `Arc<CachedForecast>` that is swapped as a whole, so a
//! reader always sees a payload together with its own timestamp. Refreshes
//! are single-flight: callers that find the entry invalid queue on a refresh
//! gate and re-check validity once they hold it, so a burst of requests after
//! expiry costs one upstream call. Failures are shared the same way: a caller
//! that was queued when an attempt finished takes that attempt's error instead
//! of fetching again, so it waits for at most the attempt in flight when it
//! arrived plus, if none was, its own.
//!
//! ## Failure
//!
//! A failed fetch never modifies the slot. By default the caller receives
//! [`ForecastOutcome::Failure`]; with `serve_stale_on_error` an expired entry
//! is returned as [`ForecastOutcome::Stale`] instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::upstream::{FetchError, ForecastPayload, ForecastSource};

/// A successfully fetched forecast and the moment it arrived.
#[derive(Debug)]
pub struct CachedForecast {
    pub payload: ForecastPayload,
    pub fetched_at: DateTime<Utc>,
}

impl CachedForecast {
    /// How long ago the forecast was fetched. Negative if the clock went back.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.fetched_at)
    }
}

/// Result of [`ForecastCache::get_forecast`].
#[derive(Debug)]
pub enum ForecastOutcome {
    /// Fetched from upstream during this call.
    Fresh(Arc<CachedForecast>),
    /// Served from the cache without an upstream call.
    Cached(Arc<CachedForecast>),
    /// Refresh failed; an expired entry is served instead. Only produced
    /// when stale serving is enabled.
    Stale {
        entry: Arc<CachedForecast>,
        error: FetchError,
    },
    /// Refresh failed and nothing may be served.
    Failure(FetchError),
}

impl ForecastOutcome {
    /// The forecast to serve, if any.
    pub fn entry(&self) -> Option<&Arc<CachedForecast>> {
        match self {
            Self::Fresh(entry) | Self::Cached(entry) | Self::Stale { entry, .. } => Some(entry),
            Self::Failure(_) => None,
        }
    }
}

/// Read-only view of the cache for health reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatus {
    pub valid: bool,
    pub now: DateTime<Utc>,
    /// When the held entry was fetched, even if it has expired.
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Single-slot, time-bounded forecast cache.
pub struct ForecastCache {
    source: Arc<dyn ForecastSource>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    serve_stale_on_error: bool,
    slot: RwLock<Option<Arc<CachedForecast>>>,
    /// Held for the duration of one upstream attempt. Guards the error of
    /// the most recent attempt, `None` if it succeeded.
    refresh_gate: Mutex<Option<FetchError>>,
    /// Completed upstream attempts. Only incremented under `refresh_gate`.
    attempts: AtomicU64,
}

impl ForecastCache {
    /// Creates an empty cache. A `ttl` too large for the clock's range is
    /// treated as "never expires".
    pub fn new(source: Arc<dyn ForecastSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            serve_stale_on_error: false,
            slot: RwLock::new(None),
            refresh_gate: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    fn is_valid(&self, entry: &CachedForecast, now: DateTime<Utc>) -> bool {
        entry.age(now) < self.ttl
    }

    /// The held entry, whether or not it is still valid.
    pub async fn snapshot(&self) -> Option<Arc<CachedForecast>> {
        self.slot.read().await.clone()
    }

    async fn valid_entry(&self) -> Option<Arc<CachedForecast>> {
        let now = self.clock.now();
        self.snapshot()
            .await
            .filter(|entry| self.is_valid(entry, now))
    }

    /// Returns the forecast to serve right now, refreshing it if needed.
    pub async fn get_forecast(&self) -> ForecastOutcome {
        if let Some(entry) = self.valid_entry().await {
            debug!(fetched_at = %entry.fetched_at, "forecast cache hit");
            return ForecastOutcome::Cached(entry);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_error = self.refresh_gate.lock().await;

        // Someone may have refreshed while we queued on the gate.
        if let Some(entry) = self.valid_entry().await {
            debug!(fetched_at = %entry.fetched_at, "forecast refreshed by a concurrent request");
            return ForecastOutcome::Cached(entry);
        }

        // An attempt finished while we queued and it failed: take its error.
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(error) = last_error.clone() {
                debug!(kind = error.kind(), "sharing failure of a concurrent refresh");
                return self.failed(error).await;
            }
        }

        let result = self.source.fetch().await;
        *last_error = result.as_ref().err().cloned();
        self.attempts.fetch_add(1, Ordering::Release);

        match result {
            Ok(payload) => {
                let entry = Arc::new(CachedForecast {
                    payload,
                    fetched_at: self.clock.now(),
                });
                *self.slot.write().await = Some(Arc::clone(&entry));
                info!(fetched_at = %entry.fetched_at, "forecast cache refreshed");
                ForecastOutcome::Fresh(entry)
            }
            Err(error) => {
                warn!(kind = error.kind(), error = %error, "forecast refresh failed; cache left unchanged");
                self.failed(error).await
            }
        }
    }

    async fn failed(&self, error: FetchError) -> ForecastOutcome {
        match self.snapshot().await {
            Some(entry) if self.serve_stale_on_error => ForecastOutcome::Stale { entry, error },
            _ => ForecastOutcome::Failure(error),
        }
    }

    /// Reports validity without fetching or mutating anything.
    pub async fn status(&self) -> CacheStatus {
        let now = self.clock.now();
        let entry = self.snapshot().await;
        CacheStatus {
            valid: entry.as_ref().is_some_and(|e| self.is_valid(e, now)),
            now,
            fetched_at: entry.map(|e| e.fetched_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::upstream::FetchFuture;

    const HOUR: Duration = Duration::from_secs(3600);

    /// Replays scripted results and counts calls.
    struct ScriptedSource {
        script: std::sync::Mutex<VecDeque<Result<ForecastPayload, FetchError>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<ForecastPayload, FetchError>>) -> Arc<Self> {
            Self::slow(script, Duration::ZERO)
        }

        fn slow(script: Vec<Result<ForecastPayload, FetchError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ForecastSource for ScriptedSource {
        fn fetch(&self) -> FetchFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(FetchError::NetworkUnreachable("script exhausted".into())))
            })
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn rejected() -> FetchError {
        FetchError::UpstreamRejected {
            status: 401,
            message: "Invalid API key".into(),
        }
    }

    fn setup(
        script: Vec<Result<ForecastPayload, FetchError>>,
    ) -> (ForecastCache, Arc<ScriptedSource>, Arc<ManualClock>) {
        let source = ScriptedSource::new(script);
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = ForecastCache::new(source.clone(), clock.clone(), HOUR);
        (cache, source, clock)
    }

    #[tokio::test]
    async fn empty_cache_fetches_and_stores() {
        let p = json!({"hourly": [1]});
        let (cache, source, _clock) = setup(vec![Ok(p.clone())]);

        let outcome = cache.get_forecast().await;
        let ForecastOutcome::Fresh(entry) = outcome else {
            panic!("expected Fresh, got {outcome:?}");
        };
        assert_eq!(entry.payload, p);
        assert_eq!(entry.fetched_at, t0());
        assert_eq!(source.calls(), 1);

        let held = cache.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&held, &entry));
    }

    #[tokio::test]
    async fn valid_entry_is_served_without_fetching() {
        let p = json!({"hourly": [1]});
        let (cache, source, clock) = setup(vec![Ok(p.clone())]);
        cache.get_forecast().await;

        clock.advance(TimeDelta::minutes(30));
        let outcome = cache.get_forecast().await;
        let ForecastOutcome::Cached(entry) = outcome else {
            panic!("expected Cached, got {outcome:?}");
        };
        assert_eq!(entry.payload, p);
        assert_eq!(entry.fetched_at, t0());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn cached_results_repeat_until_expiry() {
        let (cache, source, clock) = setup(vec![Ok(json!(1)), Ok(json!(2))]);
        cache.get_forecast().await;

        for _ in 0..5 {
            clock.advance(TimeDelta::minutes(10));
            let outcome = cache.get_forecast().await;
            assert!(matches!(&outcome, ForecastOutcome::Cached(e) if e.fetched_at == t0() && e.payload == json!(1)));
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_replaced() {
        let (cache, source, clock) = setup(vec![Ok(json!("P")), Ok(json!("Q"))]);
        cache.get_forecast().await;

        clock.advance(TimeDelta::minutes(90));
        let t1 = clock.now();
        let outcome = cache.get_forecast().await;
        let ForecastOutcome::Fresh(entry) = outcome else {
            panic!("expected Fresh, got {outcome:?}");
        };
        assert_eq!(entry.payload, json!("Q"));
        assert_eq!(entry.fetched_at, t1);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.snapshot().await.unwrap().payload, json!("Q"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_expired_entry() {
        let (cache, source, clock) = setup(vec![Ok(json!("P")), Err(rejected())]);
        cache.get_forecast().await;

        clock.advance(TimeDelta::minutes(90));
        let outcome = cache.get_forecast().await;
        assert!(matches!(outcome, ForecastOutcome::Failure(FetchError::UpstreamRejected { status: 401, .. })));
        assert_eq!(source.calls(), 2);

        let held = cache.snapshot().await.unwrap();
        assert_eq!(held.payload, json!("P"));
        assert_eq!(held.fetched_at, t0());
    }

    #[tokio::test]
    async fn failure_on_empty_cache_leaves_it_empty() {
        let (cache, source, _clock) = setup(vec![Err(FetchError::Timeout(Duration::from_secs(10)))]);

        let outcome = cache.get_forecast().await;
        assert!(matches!(outcome, ForecastOutcome::Failure(FetchError::Timeout(_))));
        assert!(outcome.entry().is_none());
        assert!(cache.snapshot().await.is_none());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failure_is_retried_on_next_call() {
        let (cache, source, _clock) = setup(vec![Err(rejected()), Ok(json!("P"))]);

        assert!(matches!(cache.get_forecast().await, ForecastOutcome::Failure(_)));
        assert!(matches!(cache.get_forecast().await, ForecastOutcome::Fresh(_)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn ttl_boundary_is_strict() {
        let (cache, _source, clock) = setup(vec![Ok(json!("P"))]);
        cache.get_forecast().await;

        clock.set(t0() + TimeDelta::hours(1) - TimeDelta::milliseconds(1));
        assert!(cache.status().await.valid);

        clock.set(t0() + TimeDelta::hours(1));
        assert!(!cache.status().await.valid);

        clock.set(t0() + TimeDelta::hours(1) + TimeDelta::milliseconds(1));
        assert!(!cache.status().await.valid);
    }

    #[tokio::test]
    async fn clock_stepping_back_keeps_entry_valid() {
        let (cache, source, clock) = setup(vec![Ok(json!("P"))]);
        cache.get_forecast().await;

        clock.advance(TimeDelta::minutes(-5));
        assert!(matches!(cache.get_forecast().await, ForecastOutcome::Cached(_)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn status_never_fetches() {
        let (cache, source, clock) = setup(vec![Ok(json!("P"))]);

        let status = cache.status().await;
        assert_eq!(
            status,
            CacheStatus {
                valid: false,
                now: t0(),
                fetched_at: None
            }
        );
        assert_eq!(source.calls(), 0);

        cache.get_forecast().await;
        clock.advance(TimeDelta::minutes(30));
        let status = cache.status().await;
        assert!(status.valid);
        assert_eq!(status.now, t0() + TimeDelta::minutes(30));

        clock.advance(TimeDelta::minutes(60));
        let status = cache.status().await;
        assert!(!status.valid);
        assert_eq!(status.fetched_at, Some(t0()));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn stale_served_only_when_enabled() {
        let source = ScriptedSource::new(vec![Ok(json!("P")), Err(rejected())]);
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = ForecastCache::new(source.clone(), clock.clone(), HOUR).serve_stale_on_error(true);
        cache.get_forecast().await;

        clock.advance(TimeDelta::minutes(90));
        let outcome = cache.get_forecast().await;
        let ForecastOutcome::Stale { entry, error } = outcome else {
            panic!("expected Stale, got {outcome:?}");
        };
        assert_eq!(entry.payload, json!("P"));
        assert_eq!(entry.fetched_at, t0());
        assert_eq!(error.kind(), "upstream_rejected");
        assert!(!cache.status().await.valid);
    }

    #[tokio::test]
    async fn stale_mode_still_fails_on_empty_cache() {
        let source = ScriptedSource::new(vec![Err(rejected())]);
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = ForecastCache::new(source, clock, HOUR).serve_stale_on_error(true);
        assert!(matches!(cache.get_forecast().await, ForecastOutcome::Failure(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let source = ScriptedSource::slow(vec![Ok(json!("P"))], Duration::from_millis(100));
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = Arc::new(ForecastCache::new(source.clone(), clock, HOUR));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_forecast().await })
            })
            .collect();

        let mut fresh = 0;
        let mut cached = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ForecastOutcome::Fresh(e) => {
                    fresh += 1;
                    assert_eq!(e.payload, json!("P"));
                }
                ForecastOutcome::Cached(e) => {
                    cached += 1;
                    assert_eq!(e.payload, json!("P"));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(fresh, 1);
        assert_eq!(cached, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_failure() {
        let fetch_time = Duration::from_millis(200);
        let source = ScriptedSource::slow(vec![Err(FetchError::Timeout(fetch_time))], fetch_time);
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = Arc::new(ForecastCache::new(source.clone(), clock, HOUR));

        let started = std::time::Instant::now();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_forecast().await })
            })
            .collect();

        for handle in handles {
            match handle.await.unwrap() {
                ForecastOutcome::Failure(FetchError::Timeout(d)) => assert_eq!(d, fetch_time),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        // One attempt, not ten back to back.
        assert!(started.elapsed() < fetch_time * 3, "took {:?}", started.elapsed());
        assert_eq!(source.calls(), 1);
        assert!(cache.snapshot().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failure_keeps_expired_entry_for_everyone() {
        let source = ScriptedSource::slow(
            vec![Ok(json!("old")), Err(rejected())],
            Duration::from_millis(100),
        );
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = Arc::new(
            ForecastCache::new(source.clone(), clock.clone(), HOUR).serve_stale_on_error(true),
        );
        assert!(matches!(cache.get_forecast().await, ForecastOutcome::Fresh(_)));
        clock.advance(TimeDelta::minutes(90));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_forecast().await })
            })
            .collect();

        for handle in handles {
            match handle.await.unwrap() {
                ForecastOutcome::Stale { entry, error } => {
                    assert_eq!(entry.payload, json!("old"));
                    assert_eq!(entry.fetched_at, t0());
                    assert_eq!(error.kind(), "upstream_rejected");
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(source.calls(), 2);
        let held = cache.snapshot().await.unwrap();
        assert_eq!(held.payload, json!("old"));
        assert_eq!(held.fetched_at, t0());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_torn_entries() {
        // Payload carries its own fetch time so a mismatch would be visible.
        let clock = Arc::new(ManualClock::new(t0()));
        let script = (0..50)
            .map(|i| Ok(json!({ "seq": i })))
            .collect::<Vec<_>>();
        let source = ScriptedSource::new(script);
        let cache = Arc::new(ForecastCache::new(source, clock.clone(), HOUR));

        let writer = {
            let cache = Arc::clone(&cache);
            let clock = Arc::clone(&clock);
            tokio::spawn(async move {
                for _ in 0..50 {
                    clock.advance(TimeDelta::hours(2));
                    cache.get_forecast().await;
                }
            })
        };

        let mut seen: Vec<(i64, DateTime<Utc>)> = Vec::new();
        while !writer.is_finished() {
            if let Some(entry) = cache.snapshot().await {
                let seq = entry.payload["seq"].as_i64().unwrap();
                seen.push((seq, entry.fetched_at));
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        // Every observed pair must match what the writer committed for that seq.
        for (seq, fetched_at) in seen {
            assert_eq!(fetched_at, t0() + TimeDelta::hours(2 * (seq + 1)));
        }
    }
}
