use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::{debug, info};

use crate::address::RoomAddress;
use crate::error::{StreamError, StreamResult};
use crate::http::HttpClient;
use crate::sandbox::{ScriptSandbox, SigningFunction};

pub const DEFAULT_SCRIPT_ENDPOINT: &str = "https://www.douyu.com/swf_api/homeH5Enc";

const ENDPOINT: &str = "homeH5Enc";

/// Envelope returned by the script endpoint, `data` keyed by `room{address}`.
#[derive(Debug, Deserialize)]
struct ScriptEnvelope {
    error: i64,
    #[serde(default)]
    data: Option<HashMap<String, serde_json::Value>>,
}

type FlightMap = Mutex<HashMap<RoomAddress, Arc<tokio::sync::Mutex<()>>>>;

#[derive(Clone)]
struct CacheEntry {
    function: Arc<SigningFunction>,
    generation: u64,
}

/**
    Per-room cache of vendor signing functions.

    Entries never expire on their own. They are replaced on a forced refresh
    and removed by [`invalidate`](Self::invalidate).

    Concurrent acquisitions for the same room are coalesced: only one caller
    fetches and executes the vendor script, the others wait on a per-room
    lock and then pick up its result.
*/
pub struct SignatureCache<H> {
    http: Arc<H>,
    sandbox: ScriptSandbox,
    endpoint: String,
    entries: RwLock<HashMap<RoomAddress, CacheEntry>>,
    flights: FlightMap,
    next_generation: AtomicU64,
}

impl<H: HttpClient> SignatureCache<H> {
    pub fn new(http: Arc<H>, sandbox: ScriptSandbox) -> Self {
        Self::with_endpoint(http, sandbox, DEFAULT_SCRIPT_ENDPOINT)
    }

    pub fn with_endpoint(http: Arc<H>, sandbox: ScriptSandbox, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            sandbox,
            endpoint: endpoint.into(),
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /**
        Get a signing function for `address`.

        Reuses the cached one unless `force_fresh` is set, in which case the
        vendor script is fetched and executed again and the entry replaced.
    */
    pub async fn acquire(
        &self,
        address: &RoomAddress,
        force_fresh: bool,
    ) -> StreamResult<Arc<SigningFunction>> {
        let observed = self.generation_of(address);
        if !force_fresh && let Some(entry) = self.entry(address) {
            debug!("[signature] Reusing cached signer for room {}", address);
            return Ok(entry.function);
        }

        let flight = Flight::join(&self.flights, address);
        let _guard = flight.lock.lock().await;

        // Someone else may have finished while we were waiting
        if let Some(entry) = self.entry(address) {
            let refreshed_meanwhile = Some(entry.generation) != observed;
            if !force_fresh || refreshed_meanwhile {
                debug!(
                    "[signature] Picked up signer fetched concurrently for room {}",
                    address
                );
                return Ok(entry.function);
            }
        }

        let function = Arc::new(self.fetch_and_execute(address).await?);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        self.entries.write().insert(
            address.clone(),
            CacheEntry {
                function: Arc::clone(&function),
                generation,
            },
        );

        Ok(function)
    }

    /// Drop the cached signing function for `address`, if any.
    pub fn invalidate(&self, address: &RoomAddress) {
        if self.entries.write().remove(address).is_some() {
            info!("[signature] Invalidated cached signer for room {}", address);
        }

        let mut flights = self.flights.lock();
        if flights
            .get(address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            flights.remove(address);
        }
    }

    pub fn contains(&self, address: &RoomAddress) -> bool {
        self.entries.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, address: &RoomAddress) -> Option<CacheEntry> {
        self.entries.read().get(address).cloned()
    }

    fn generation_of(&self, address: &RoomAddress) -> Option<u64> {
        self.entries.read().get(address).map(|e| e.generation)
    }

    #[cfg(test)]
    fn flights_in_use(&self) -> usize {
        self.flights.lock().len()
    }

    async fn fetch_and_execute(&self, address: &RoomAddress) -> StreamResult<SigningFunction> {
        let url = format!("{}?rids={}", self.endpoint, address);
        debug!("[signature] Fetching vendor script: {}", url);

        let response = self.http.get(&url).await?;
        if !response.is_ok() {
            return Err(StreamError::UnexpectedStatus {
                endpoint: ENDPOINT,
                status: response.status,
                body: response.body,
            });
        }

        let source = extract_script(address, &response.body)?;
        debug!(
            "[signature] Executing vendor script for room {} ({} bytes)",
            address,
            source.len()
        );

        let sandbox = self.sandbox.clone();
        let function = tokio::task::spawn_blocking(move || sandbox.execute(&source)).await??;
        info!("[signature] Prepared fresh signer for room {}", address);

        Ok(function)
    }
}

/**
    Membership in the per-room fetch lock.

    The lock stays in the map only while someone holds a membership, and the
    last member out removes it. Dropping covers errors and cancelled callers.
*/
struct Flight<'a> {
    flights: &'a FlightMap,
    address: &'a RoomAddress,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(flights: &'a FlightMap, address: &'a RoomAddress) -> Self {
        let lock = Arc::clone(flights.lock().entry(address.clone()).or_default());
        Self {
            flights,
            address,
            lock,
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        // One reference is the map's, one is ours
        let last = Arc::strong_count(&self.lock) == 2;
        if last
            && flights
                .get(self.address)
                .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock))
        {
            flights.remove(self.address);
        }
    }
}

fn extract_script(address: &RoomAddress, body: &str) -> StreamResult<String> {
    let envelope: ScriptEnvelope =
        serde_json::from_str(body).map_err(|e| StreamError::malformed(ENDPOINT, e))?;

    if envelope.error != 0 {
        return Err(StreamError::UnexpectedErrorCode {
            endpoint: ENDPOINT,
            code: envelope.error,
            envelope: body.to_string(),
        });
    }

    let key = format!("room{}", address);
    envelope
        .data
        .as_ref()
        .and_then(|data| data.get(&key))
        .and_then(|value| value.as_str())
        .filter(|code| !code.trim().is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            StreamError::malformed(ENDPOINT, format!("missing script '{}' in {}", key, body))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::testing::{FakeHttp, script_envelope};

    fn address() -> RoomAddress {
        RoomAddress::parse("123456").unwrap()
    }

    fn cache(http: &Arc<FakeHttp>) -> SignatureCache<FakeHttp> {
        SignatureCache::new(Arc::clone(http), ScriptSandbox::default())
    }

    #[tokio::test]
    async fn test_reuses_cached_signer() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(script_envelope("123456"));
        let cache = cache(&http);

        let first = cache.acquire(&address(), false).await.unwrap();
        let second = cache.acquire(&address(), false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(http.get_count(), 1);
        assert_eq!(
            http.get_urls(),
            vec!["https://www.douyu.com/swf_api/homeH5Enc?rids=123456".to_string()]
        );
    }

    #[tokio::test]
    async fn test_forced_refresh_refetches() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(script_envelope("123456"));
        http.push_get(script_envelope("123456"));
        let cache = cache(&http);

        let first = cache.acquire(&address(), false).await.unwrap();
        let second = cache.acquire(&address(), true).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(http.get_count(), 2);

        let third = cache.acquire(&address(), false).await.unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(script_envelope("123456"));
        http.push_get(script_envelope("123456"));
        let cache = cache(&http);

        cache.invalidate(&address());
        cache.acquire(&address(), false).await.unwrap();
        assert!(cache.contains(&address()));

        cache.invalidate(&address());
        cache.invalidate(&address());
        assert!(cache.is_empty());

        cache.acquire(&address(), false).await.unwrap();
        assert_eq!(http.get_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_coalesced() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(script_envelope("123456"));
        let cache = Arc::new(cache(&http));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.acquire(&address(), false).await.unwrap()
            }));
        }

        let mut signers = Vec::new();
        for handle in handles {
            signers.push(handle.await.unwrap());
        }

        assert_eq!(http.get_count(), 1);
        assert!(signers.iter().all(|s| Arc::ptr_eq(s, &signers[0])));
    }

    #[tokio::test]
    async fn test_forced_refresh_reuses_concurrent_refresh() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(script_envelope("123456"));
        let cache = Arc::new(cache(&http));
        let stale = cache.acquire(&address(), false).await.unwrap();

        let gate = http.push_get_gated(script_envelope("123456"));
        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.acquire(&address(), true).await.unwrap() })
        };
        while http.get_count() < 2 {
            tokio::task::yield_now().await;
        }

        // Starts while the first refresh is still waiting on the network
        let second = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.acquire(&address(), true).await.unwrap() })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(http.get_count(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &stale));
    }

    #[tokio::test]
    async fn test_forced_refresh_refetches_after_failed_refresh() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(script_envelope("123456"));
        let cache = Arc::new(cache(&http));
        let stale = cache.acquire(&address(), false).await.unwrap();

        let gate = http.push_get_gated(HttpResponse::new(500, "oops"));
        http.push_get(script_envelope("123456"));

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.acquire(&address(), true).await })
        };
        while http.get_count() < 2 {
            tokio::task::yield_now().await;
        }

        let second = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.acquire(&address(), true).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let err = first.await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::UnexpectedStatus { status: 500, .. }));

        // The cached entry was never replaced, so the waiter fetches its own
        let second = second.await.unwrap().unwrap();
        assert_eq!(http.get_count(), 3);
        assert!(!Arc::ptr_eq(&second, &stale));
    }

    #[tokio::test]
    async fn test_fetch_locks_are_released() {
        let http = Arc::new(FakeHttp::new());
        let cache = cache(&http);

        // No scripted responses: every fetch fails
        for room in 1..=50 {
            let address = RoomAddress::parse(&room.to_string()).unwrap();
            assert!(cache.acquire(&address, false).await.is_err());
        }
        assert_eq!(cache.flights_in_use(), 0);

        http.push_get(script_envelope("123456"));
        cache.acquire(&address(), false).await.unwrap();
        assert_eq!(cache.flights_in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_lock() {
        let http = Arc::new(FakeHttp::new());
        http.push_get_hang();
        let cache = cache(&http);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            cache.acquire(&address(), false),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(cache.flights_in_use(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_error_code() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(HttpResponse::new(200, r#"{"error":1,"data":null}"#));
        let err = cache(&http).acquire(&address(), false).await.unwrap_err();
        assert!(matches!(err, StreamError::UnexpectedErrorCode { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_missing_script_field() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(HttpResponse::new(200, r#"{"error":0,"data":{"room999":"x"}}"#));
        http.push_get(HttpResponse::new(200, r#"{"error":0,"data":{"room123456":"  "}}"#));
        let cache = cache(&http);

        let err = cache.acquire(&address(), false).await.unwrap_err();
        assert!(err.is_upstream_protocol());
        let err = cache.acquire(&address(), false).await.unwrap_err();
        assert!(err.is_upstream_protocol());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_envelope() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(HttpResponse::new(200, "<html>"));
        let err = cache(&http).acquire(&address(), false).await.unwrap_err();
        assert!(matches!(err, StreamError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_broken_script_is_not_cached() {
        let http = Arc::new(FakeHttp::new());
        http.push_get(HttpResponse::new(
            200,
            r#"{"error":0,"data":{"room123456":"throw new Error('x')"}}"#,
        ));
        let cache = cache(&http);

        let err = cache.acquire(&address(), false).await.unwrap_err();
        assert!(matches!(err, StreamError::Sandbox(_)));
        assert!(!cache.contains(&address()));
        assert_eq!(http.get_count(), 1);
    }
}
