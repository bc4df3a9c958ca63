use std::error::Error as StdError;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use http::header::CONTENT_TYPE;
use http::response::Parts;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower::{Layer, Service, ServiceExt};

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

use crate::backend::{AnyBackend, CacheBackend};
use crate::capture::{check_response, stamp_date};
use crate::codec::CachedArtifact;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::freshness::{is_fresh, Clock};
use crate::key::KeyExtractor;
use crate::logging::{CacheEvent, CacheEventType, LoggingConfig};
use crate::policy::{request_bypasses_cache, CachePolicy};
use crate::purge::{ClientAddr, PurgeAcl};

pub type BoxError = Box<dyn StdError + Send + Sync>;

type LockMap = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Caching and purging layer for Tower HTTP services.
///
/// `GET` responses that pass the capture checks are stored in the backend
/// and replayed while their `s-maxage` lasts. `PURGE` requests from
/// addresses on the purge ACL delete the entry for their key. Everything
/// else goes straight to the inner service.
///
/// Create instances via [`CacheLayer::builder`], [`CacheLayer::new`] for the
/// default policy, or [`CacheLayer::from_config`]. Cloning a `CacheLayer`
/// is cheap and shares the backend, the policy and the in-flight locks.
#[derive(Clone)]
pub struct CacheLayer<B> {
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
    locks: LockMap,
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder<B> {
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

impl<B> CacheLayerBuilder<B>
where
    B: CacheBackend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            policy: CachePolicy::default(),
            key_extractor: KeyExtractor::default(),
        }
    }

    /// Replaces the cache policy with a pre-built value.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the addresses allowed to purge. Defaults to `127.0.0.1`.
    pub fn purge_acl(mut self, acl: PurgeAcl) -> Self {
        self.policy = self.policy.with_purge_acl(acl);
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.policy = self.policy.with_clock(clock);
        self
    }

    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    /// Lets concurrent misses for one key wait for a single upstream fetch.
    pub fn coalesce_misses(mut self, enabled: bool) -> Self {
        self.policy = self.policy.with_coalesce_misses(enabled);
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.policy = self.policy.with_logging(config);
        self
    }

    pub fn build(self) -> CacheLayer<B> {
        CacheLayer {
            backend: self.backend,
            policy: self.policy,
            key_extractor: self.key_extractor,
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl CacheLayer<AnyBackend> {
    /// Validates `config`, opens its backend and builds the layer.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let acl = config.purge_acl()?;
        let backend = config.build_backend()?;
        Ok(CacheLayerBuilder::new(backend)
            .purge_acl(acl)
            .coalesce_misses(config.coalesce_misses)
            .build())
    }
}

impl<B> CacheLayer<B>
where
    B: CacheBackend,
{
    /// Builds a cache layer with the default [`CachePolicy`].
    pub fn new(backend: B) -> Self {
        CacheLayerBuilder::new(backend).build()
    }

    pub fn builder(backend: B) -> CacheLayerBuilder<B> {
        CacheLayerBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }
}

impl<S, B> Layer<S> for CacheLayer<B>
where
    B: CacheBackend,
{
    type Service = CacheService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            backend: self.backend.clone(),
            policy: self.policy.clone(),
            key_extractor: self.key_extractor.clone(),
            locks: self.locks.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S, B> {
    inner: S,
    backend: B,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
    locks: LockMap,
}

impl<S, B, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S, B>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
    B: CacheBackend,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().clone();
        let backend = self.backend.clone();
        let policy = self.policy.clone();
        let inner = self.inner.clone();

        if policy.is_purge(&method) {
            let caller = ClientAddr::from_extensions(req.extensions());
            let key = self.key_extractor.extract(req.uri(), req.headers());
            return Box::pin(async move { purge(&backend, &policy, key, caller).await });
        }

        if !policy.should_cache_method(&method) {
            return Box::pin(async move {
                let (parts, body, _) = forward(inner, req).await?;
                Ok(Response::from_parts(parts, Full::from(body)))
            });
        }

        let key = self.key_extractor.extract(req.uri(), req.headers());
        if key.is_empty() || request_bypasses_cache(req.headers()) {
            return Box::pin(async move {
                CacheEvent::new(CacheEventType::Bypass, key)
                    .with_method(method)
                    .log(policy.logging());
                let (parts, body, _) = forward(inner, req).await?;
                Ok(Response::from_parts(parts, Full::from(body)))
            });
        }

        let locks = self.locks.clone();
        Box::pin(async move {
            tracing::debug!(method = %method, key = %key, "cache_call");
            let is_head = method == Method::HEAD;

            match lookup(&backend, &key, policy.clock().now()).await? {
                HitState::Fresh(artifact) => return Ok(replay(&policy, &key, artifact, is_head)),
                HitState::Stale => {
                    #[cfg(feature = "metrics")]
                    counter!("tower_edge_cache.stale").increment(1);
                    CacheEvent::new(CacheEventType::Stale, key.as_str())
                        .with_method(method.clone())
                        .log(policy.logging());
                }
                HitState::Miss => {}
            }

            // Only GET misses populate the store, so only they coalesce.
            let mut primary_guard: Option<StampedeGuard> = None;
            if policy.coalesce_misses() && !is_head {
                match StampedeGuard::acquire_handle(locks.clone(), key.clone()) {
                    StampedeHandle::Primary(guard) => primary_guard = Some(guard),
                    StampedeHandle::Secondary(lock) => {
                        drop(lock.lock_owned().await);

                        if let HitState::Fresh(artifact) =
                            lookup(&backend, &key, policy.clock().now()).await?
                        {
                            return Ok(replay(&policy, &key, artifact, is_head));
                        }

                        if let StampedeHandle::Primary(guard) =
                            StampedeGuard::acquire_handle(locks.clone(), key.clone())
                        {
                            primary_guard = Some(guard);
                        }
                    }
                }
            }

            #[cfg(feature = "metrics")]
            counter!("tower_edge_cache.miss").increment(1);
            CacheEvent::new(CacheEventType::Miss, key.as_str())
                .with_method(method.clone())
                .log(policy.logging());

            let (mut parts, body, latency) = forward(inner, req).await?;
            #[cfg(feature = "metrics")]
            histogram!("tower_edge_cache.upstream_latency").record(latency.as_secs_f64());

            if is_head {
                return Ok(Response::from_parts(parts, Full::from(body)));
            }

            match check_response(parts.status, &parts.headers) {
                Ok(()) => {
                    stamp_date(&mut parts.headers, policy.clock().now());
                    store(&backend, &policy, &key, &parts, &body, latency).await?;
                }
                Err(reason) => {
                    #[cfg(feature = "metrics")]
                    counter!("tower_edge_cache.store_skipped").increment(1);
                    CacheEvent::new(CacheEventType::Uncacheable, key.as_str())
                        .with_method(method)
                        .with_status(parts.status)
                        .with_latency(latency)
                        .with_detail(reason)
                        .log(policy.logging());
                }
            }

            drop(primary_guard);

            Ok(Response::from_parts(parts, Full::from(body)))
        })
    }
}

/// Calls the inner service once and buffers the whole response body.
async fn forward<S, ReqBody, ResBody>(
    inner: S,
    req: Request<ReqBody>,
) -> Result<(Parts, Bytes, Duration), BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    let start = Instant::now();
    let response = inner
        .oneshot(req)
        .await
        .map_err(|err| -> BoxError { err.into() })?;
    let latency = start.elapsed();

    let (parts, body) = response.into_parts();
    let collected = BodyExt::collect(body)
        .await
        .map_err(|err| -> BoxError { err.into() })?;
    Ok((parts, collected.to_bytes(), latency))
}

async fn lookup<B>(backend: &B, key: &str, now: SystemTime) -> Result<HitState, CacheError>
where
    B: CacheBackend,
{
    let bytes = match backend.get(key).await {
        Ok(bytes) => bytes,
        Err(err) if err.is_not_found() => return Ok(HitState::Miss),
        Err(err) => return Err(err),
    };

    match CachedArtifact::decode(bytes) {
        Ok(artifact) => Ok(classify_hit(artifact, now)),
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "discarding undecodable cache entry");
            Ok(HitState::Miss)
        }
    }
}

fn classify_hit(artifact: CachedArtifact, now: SystemTime) -> HitState {
    if is_fresh(&artifact.headers, now) {
        HitState::Fresh(artifact)
    } else {
        HitState::Stale
    }
}

#[derive(Debug)]
enum HitState {
    Fresh(CachedArtifact),
    Stale,
    Miss,
}

fn replay(
    policy: &CachePolicy,
    key: &str,
    artifact: CachedArtifact,
    is_head: bool,
) -> Response<Full<Bytes>> {
    #[cfg(feature = "metrics")]
    counter!("tower_edge_cache.hit").increment(1);
    CacheEvent::new(CacheEventType::Hit, key)
        .with_status(artifact.status)
        .with_size(artifact.body.len())
        .log(policy.logging());

    if is_head {
        artifact.into_head_response()
    } else {
        artifact.into_response()
    }
}

async fn store<B>(
    backend: &B,
    policy: &CachePolicy,
    key: &str,
    parts: &Parts,
    body: &Bytes,
    latency: Duration,
) -> Result<(), BoxError>
where
    B: CacheBackend,
{
    let artifact = CachedArtifact::new(parts.status, parts.headers.clone(), body.clone());
    let encoded = match artifact.encode() {
        Ok(encoded) => encoded,
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "failed to encode response");
            return Ok(());
        }
    };
    let size = encoded.len();

    match backend.put(key, encoded).await {
        Ok(()) => {
            #[cfg(feature = "metrics")]
            counter!("tower_edge_cache.store").increment(1);
            CacheEvent::new(CacheEventType::Store, key)
                .with_status(parts.status)
                .with_size(size)
                .with_latency(latency)
                .log(policy.logging());
            Ok(())
        }
        Err(err) if err.is_write_dropped() => {
            #[cfg(feature = "metrics")]
            counter!("tower_edge_cache.write_dropped").increment(1);
            CacheEvent::new(CacheEventType::WriteDropped, key)
                .with_size(size)
                .log(policy.logging());
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn purge<B>(
    backend: &B,
    policy: &CachePolicy,
    key: String,
    caller: Option<ClientAddr>,
) -> Result<Response<Full<Bytes>>, BoxError>
where
    B: CacheBackend,
{
    let authorized = caller
        .as_ref()
        .is_some_and(|addr| policy.purge_acl().is_authorized(addr.as_str()));
    let caller = caller.map(|addr| addr.to_string()).unwrap_or_default();

    if !authorized {
        #[cfg(feature = "metrics")]
        counter!("tower_edge_cache.purge_denied").increment(1);
        CacheEvent::new(CacheEventType::PurgeDenied, key)
            .with_status(StatusCode::METHOD_NOT_ALLOWED)
            .with_detail(caller)
            .log(policy.logging());
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }

    if !key.is_empty() {
        backend.delete(&key).await?;
    }

    #[cfg(feature = "metrics")]
    counter!("tower_edge_cache.purge").increment(1);
    CacheEvent::new(CacheEventType::Purge, key)
        .with_status(StatusCode::NO_CONTENT)
        .with_detail(caller)
        .log(policy.logging());

    let mut response = Response::new(Full::default());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

struct StampedeGuard {
    key: String,
    locks: LockMap,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

enum StampedeHandle {
    Primary(StampedeGuard),
    Secondary(Arc<Mutex<()>>),
}

impl StampedeGuard {
    fn acquire_handle(locks: LockMap, key: String) -> StampedeHandle {
        match locks.entry(key.clone()) {
            Entry::Occupied(entry) => StampedeHandle::Secondary(entry.get().clone()),
            Entry::Vacant(entry) => {
                let lock = Arc::new(Mutex::new(()));
                match lock.clone().try_lock_owned() {
                    Ok(guard) => {
                        entry.insert(lock.clone());
                        StampedeHandle::Primary(StampedeGuard {
                            key,
                            locks: locks.clone(),
                            lock,
                            _guard: guard,
                        })
                    }
                    // unreachable for a mutex nobody else has seen yet
                    Err(_) => StampedeHandle::Secondary(lock),
                }
            }
        }
    }
}

impl Drop for StampedeGuard {
    fn drop(&mut self) {
        if let Some(current) = self.locks.get(&self.key) {
            let should_remove = Arc::ptr_eq(&self.lock, current.value());
            drop(current);
            if should_remove {
                self.locks.remove(&self.key);
            }
        }
    }
}
