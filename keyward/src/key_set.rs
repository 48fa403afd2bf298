//! A cache of the identity provider's published signing keys
//!
//! The cache starts empty. It is filled on first use and refreshed on demand
//! once the held key set is older than its time-to-live. A background task
//! can also be spawned to refresh the keys on a fixed schedule.
//!
//! Concurrent callers that find the cache empty or stale share a single
//! in-flight fetch, so a burst of requests produces at most one call to the
//! key set endpoint.

use std::{
    error::Error,
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use aliri::Jwks;
use aliri_clock::{Clock, System, UnixTime};
use arc_swap::ArcSwapOption;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode, Url,
};
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle, time::MissedTickBehavior};

use crate::SharedClock;

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// An error while retrieving the key set
///
/// Clonable so that the outcome of a shared fetch can be handed to every
/// waiting caller.
#[derive(Clone, Debug, Error)]
pub enum KeySetError {
    /// The request failed, timed out, returned an error status, or its body
    /// could not be decoded
    #[error("error requesting key set from identity provider")]
    Request(#[source] Arc<reqwest::Error>),
    /// The key set endpoint published no keys
    #[error("identity provider published an empty key set")]
    Empty,
    /// The endpoint answered `304 Not Modified`, but no key set is held
    #[error("key set reported as not modified, but no key set is cached")]
    NotModifiedWithoutCache,
}

impl From<reqwest::Error> for KeySetError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(Arc::new(err))
    }
}

/// A snapshot of the provider's signing keys and when they were fetched
///
/// Snapshots are immutable. A refresh replaces the whole snapshot.
#[derive(Debug)]
pub struct KeySet {
    jwks: Jwks,
    fetched_at: UnixTime,
    ttl: Duration,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

impl KeySet {
    /// The signing keys
    #[inline]
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    /// When the keys were fetched or last confirmed unchanged
    #[inline]
    pub fn fetched_at(&self) -> UnixTime {
        self.fetched_at
    }

    /// How long after `fetched_at` the keys are considered fresh
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether more than `ttl` has elapsed since the keys were fetched
    #[inline]
    pub fn is_stale(&self, now: UnixTime) -> bool {
        now.0.saturating_sub(self.fetched_at.0) > self.ttl.as_secs()
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<KeySet>, KeySetError>>>;

struct Source {
    current: ArcSwapOption<KeySet>,
    jwks_url: Url,
    client: Client,
    clock: SharedClock,
    ttl: Duration,
    timeout: Duration,
}

struct Inner {
    source: Arc<Source>,
    in_flight: Mutex<Option<SharedFetch>>,
}

/// A cache of the provider's JSON Web Key Set
///
/// Cloning is cheap; clones share the same cached keys.
#[derive(Clone)]
#[must_use]
pub struct KeySetCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let source = &self.inner.source;
        f.debug_struct("KeySetCache")
            .field("jwks_url", &source.jwks_url.as_str())
            .field("ttl", &source.ttl)
            .field("timeout", &source.timeout)
            .field("current", &source.current.load_full())
            .finish()
    }
}

/// Builder for a [`KeySetCache`]
#[must_use]
pub struct KeySetCacheBuilder {
    jwks_url: Url,
    client: Option<Client>,
    clock: Option<SharedClock>,
    ttl: Duration,
    timeout: Duration,
}

impl fmt::Debug for KeySetCacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeySetCacheBuilder")
            .field("jwks_url", &self.jwks_url.as_str())
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KeySetCacheBuilder {
    /// Uses the given HTTP client for fetches
    pub fn client(self, client: Client) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    /// Uses the given clock to judge staleness
    pub fn clock(self, clock: SharedClock) -> Self {
        Self {
            clock: Some(clock),
            ..self
        }
    }

    /// Sets how long a fetched key set is considered fresh (default: 1 hour)
    pub fn ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Sets the upper bound for a single fetch (default: 10 seconds)
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Constructs the empty cache
    pub fn build(self) -> KeySetCache {
        let client = self.client.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(System));

        KeySetCache {
            inner: Arc::new(Inner {
                source: Arc::new(Source {
                    current: ArcSwapOption::empty(),
                    jwks_url: self.jwks_url,
                    client,
                    clock,
                    ttl: self.ttl,
                    timeout: self.timeout,
                }),
                in_flight: Mutex::new(None),
            }),
        }
    }
}

impl KeySetCache {
    /// Starts building a cache for the key set published at `jwks_url`
    pub fn builder(jwks_url: Url) -> KeySetCacheBuilder {
        KeySetCacheBuilder {
            jwks_url,
            client: None,
            clock: None,
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Constructs an empty cache with default settings
    pub fn new(jwks_url: Url) -> Self {
        Self::builder(jwks_url).build()
    }

    /// The key set endpoint
    #[inline]
    pub fn jwks_url(&self) -> &Url {
        &self.inner.source.jwks_url
    }

    /// The clock used to judge staleness
    #[inline]
    pub fn clock(&self) -> &SharedClock {
        &self.inner.source.clock
    }

    /// The currently held key set, regardless of freshness
    pub fn current(&self) -> Option<Arc<KeySet>> {
        self.inner.source.current.load_full()
    }

    /// Returns the cached key set, first refreshing it if the cache is empty
    /// or stale
    ///
    /// # Errors
    ///
    /// Returns an error if a refresh was needed and failed. The previously
    /// cached keys, if any, are kept.
    pub async fn keys(&self) -> Result<Arc<KeySet>, KeySetError> {
        if let Some(fresh) = self.fresh() {
            tracing::trace!("using cached JWKS");
            return Ok(fresh);
        }

        self.join_fetch(false).await
    }

    /// Fetches the key set now, even if the cached keys are still fresh
    ///
    /// If a fetch is already in flight, this waits for that fetch instead of
    /// starting another. No retries are attempted. If the fetch fails, no
    /// change is made to the cached keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch failed.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, KeySetError> {
        self.join_fetch(true).await
    }

    /// Installs a key set directly, replacing any cached keys
    ///
    /// # Errors
    ///
    /// Returns an error if the key set is empty.
    pub fn set_jwks(&self, jwks: Jwks) -> Result<(), KeySetError> {
        if jwks.keys().is_empty() {
            return Err(KeySetError::Empty);
        }

        let source = &self.inner.source;
        source.current.store(Some(Arc::new(KeySet {
            jwks,
            fetched_at: source.clock.now(),
            ttl: source.ttl,
            etag: None,
            last_modified: None,
        })));

        Ok(())
    }

    /// Spawns a task that refreshes the key set every `interval`
    ///
    /// The first refresh happens immediately. Failures are logged and retried
    /// at the next interval. The task runs until [`RefreshTask::shutdown`] is
    /// called or the handle is dropped.
    pub fn spawn_refresh(&self, interval: Duration) -> RefreshTask {
        let this = self.clone();
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop => {
                        tracing::debug!("JWKS refresh task stopping");
                        break;
                    }
                    _ = timer.tick() => {
                        if let Err(err) = this.refresh().await {
                            tracing::warn!(
                                error = &err as &dyn Error,
                                retry_in_secs = interval.as_secs(),
                                "scheduled JWKS refresh failed",
                            );
                        }
                    }
                }
            }
        });

        RefreshTask {
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    fn fresh(&self) -> Option<Arc<KeySet>> {
        let source = &self.inner.source;
        source
            .current
            .load_full()
            .filter(|set| !set.is_stale(source.clock.now()))
    }

    fn join_fetch(&self, force: bool) -> SharedFetch {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(fetch) = in_flight.as_ref() {
            tracing::trace!("joining in-flight JWKS refresh");
            return fetch.clone();
        }

        // Another caller may have completed a refresh while we waited
        if !force {
            if let Some(fresh) = self.fresh() {
                return future::ready(Ok::<_, KeySetError>(fresh)).boxed().shared();
            }
        }

        let source = Arc::clone(&self.inner.source);
        let slot: Weak<Inner> = Arc::downgrade(&self.inner);
        let fetch = async move {
            let result = source.fetch().await;
            if let Some(inner) = slot.upgrade() {
                *inner
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
            }
            result
        }
        .boxed()
        .shared();

        *in_flight = Some(fetch.clone());
        fetch
    }
}

impl Source {
    #[tracing::instrument(skip(self), fields(jwks.url = tracing::field::Empty))]
    async fn fetch(&self) -> Result<Arc<KeySet>, KeySetError> {
        tracing::Span::current().record("jwks.url", self.jwks_url.as_str());
        tracing::debug!("refreshing JWKS");

        let previous = self.current.load_full();
        let mut request = self.client.get(self.jwks_url.clone()).timeout(self.timeout);

        if let Some(previous) = &previous {
            if let Some(etag) = &previous.etag {
                request = request.header(header::IF_NONE_MATCH, etag.clone());
            } else if let Some(last_modified) = &previous.last_modified {
                request = request.header(header::IF_MODIFIED_SINCE, last_modified.clone());
            }
        }

        let response = request.send().await.map_err(|err| {
            tracing::warn!(
                error = &err as &dyn Error,
                "JWKS refresh failed; unable to reach key set endpoint"
            );
            KeySetError::from(err)
        })?;

        if response.status() == StatusCode::NOT_MODIFIED {
            let previous = previous.ok_or(KeySetError::NotModifiedWithoutCache)?;
            tracing::debug!("JWKS not modified");

            let set = Arc::new(KeySet {
                jwks: previous.jwks.clone(),
                fetched_at: self.clock.now(),
                ttl: self.ttl,
                etag: previous.etag.clone(),
                last_modified: previous.last_modified.clone(),
            });
            self.current.store(Some(Arc::clone(&set)));
            return Ok(set);
        }

        if let Err(err) = response.error_for_status_ref() {
            tracing::warn!(
                error = &err as &dyn Error,
                http.status_code = response.status().as_u16(),
                "JWKS refresh failed; unexpected response status",
            );
            return Err(err.into());
        }

        let etag = response.headers().get(header::ETAG).cloned();
        let last_modified = response.headers().get(header::LAST_MODIFIED).cloned();

        let jwks = response.json::<Jwks>().await.map_err(|err| {
            tracing::warn!(
                error = &err as &dyn Error,
                "JWKS refresh failed; unable to decode key set"
            );
            KeySetError::from(err)
        })?;

        if jwks.keys().is_empty() {
            tracing::warn!("JWKS refresh failed; key set is empty");
            return Err(KeySetError::Empty);
        }

        let set = Arc::new(KeySet {
            jwks,
            fetched_at: self.clock.now(),
            ttl: self.ttl,
            etag,
            last_modified,
        });
        self.current.store(Some(Arc::clone(&set)));

        tracing::info!(jwks.keys = set.jwks.keys().len(), "JWKS refreshed");

        Ok(set)
    }
}

/// Handle to a background key set refresh task
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub struct RefreshTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTask {
    /// Stops the task and waits for it to finish
    ///
    /// A refresh that is already underway is allowed to complete.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::warn!(error = &err as &dyn Error, "JWKS refresh task panicked");
                }
            }
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use color_eyre::Result;
    use tracing_test::traced_test;
    use wiremock::{
        matchers::{header as header_eq, method, path},
        Mock, MockServer, Request, Respond, ResponseTemplate,
    };

    use super::*;
    use crate::test_support::{public_jwks, signing_key, ManualClock};

    const START: u64 = 1_700_000_000;
    const TTL: u64 = 3_600;

    fn cache_for(server: &MockServer, clock: &ManualClock) -> Result<KeySetCache> {
        Ok(
            KeySetCache::builder(Url::parse(&format!("{}/oauth/v2/keys", server.uri()))?)
                .clock(Arc::new(clock.clone()))
                .ttl(Duration::from_secs(TTL))
                .build(),
        )
    }

    fn jwks_body() -> Result<serde_json::Value> {
        Ok(serde_json::to_value(public_jwks(&[signing_key("K1")?]))?)
    }

    #[tokio::test]
    async fn first_use_fetches_keys() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/v2/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()?))
            .expect(1)
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        assert!(cache.current().is_none());

        let keys = cache.keys().await?;

        assert_eq!(keys.jwks().keys().len(), 1);
        assert_eq!(keys.fetched_at(), UnixTime(START));
        Ok(())
    }

    #[tokio::test]
    async fn fresh_keys_are_served_from_cache() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()?))
            .expect(1)
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        let first = cache.keys().await?;

        clock.set(START + TTL - 1);
        let second = cache.keys().await?;

        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }

    #[tokio::test]
    async fn stale_keys_are_fetched_once_for_concurrent_callers() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()?))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_body()?)
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        let first = cache.keys().await?;

        clock.set(START + TTL + 1);
        let results = futures::future::join_all((0..8).map(|_| cache.keys())).await;

        let mut refreshed = Vec::new();
        for result in results {
            refreshed.push(result?);
        }
        assert!(refreshed.iter().all(|k| Arc::ptr_eq(k, &refreshed[0])));
        assert!(!Arc::ptr_eq(&first, &refreshed[0]));
        assert_eq!(refreshed[0].fetched_at(), UnixTime(START + TTL + 1));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_refresh_keeps_previous_keys() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()?))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        let first = cache.keys().await?;

        clock.set(START + TTL + 1);
        let err = cache.keys().await.unwrap_err();

        assert!(matches!(err, KeySetError::Request(_)));
        let current = cache.current().expect("previous keys retained");
        assert!(Arc::ptr_eq(&first, &current));
        assert!(logs_contain("unexpected response status"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_key_set_is_rejected() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [] })),
            )
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;

        assert!(matches!(cache.keys().await, Err(KeySetError::Empty)));
        assert!(cache.current().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn not_modified_restamps_cached_keys() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_eq("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .set_body_json(jwks_body()?),
            )
            .expect(1)
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        let first = cache.keys().await?;

        clock.set(START + TTL + 1);
        let second = cache.keys().await?;

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.jwks(), second.jwks());
        assert_eq!(second.fetched_at(), UnixTime(START + TTL + 1));
        Ok(())
    }

    #[tokio::test]
    async fn forced_refresh_ignores_freshness() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()?))
            .expect(2)
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        cache.keys().await?;
        cache.refresh().await?;
        Ok(())
    }

    #[tokio::test]
    async fn set_jwks_rejects_empty_sets() -> Result<()> {
        let cache = KeySetCache::new(Url::parse("http://localhost:8080/oauth/v2/keys")?);

        assert!(matches!(
            cache.set_jwks(Jwks::default()),
            Err(KeySetError::Empty)
        ));

        cache.set_jwks(public_jwks(&[signing_key("K1")?]))?;
        assert!(cache.current().is_some());
        Ok(())
    }

    struct CountingResponder {
        calls: Arc<AtomicUsize>,
        body: serde_json::Value,
    }

    impl Respond for CountingResponder {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200).set_body_json(self.body.clone())
            }
        }
    }

    #[tokio::test]
    async fn background_refresh_survives_failures_and_shuts_down() -> Result<()> {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .respond_with(CountingResponder {
                calls: Arc::clone(&calls),
                body: jwks_body()?,
            })
            .mount(&server)
            .await;

        let clock = ManualClock::at(START);
        let cache = cache_for(&server, &clock)?;
        let task = cache.spawn_refresh(Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < 2 || cache.current().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        task.shutdown().await;

        let calls_at_shutdown = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), calls_at_shutdown);
        assert!(cache.current().is_some());
        Ok(())
    }
}
