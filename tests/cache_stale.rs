use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{CACHE_CONTROL, DATE};
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use tower::service_fn;
use tower::{Layer, Service, ServiceExt};
use tower_edge_cache::prelude::*;

// Mon, 01 Jan 2024 00:00:00 GMT
const EPOCH_2024: u64 = 1_704_067_200;

fn test_clock() -> (Arc<AtomicU64>, Clock) {
    let now = Arc::new(AtomicU64::new(EPOCH_2024));
    let clock = Clock::custom({
        let now = now.clone();
        move || UNIX_EPOCH + Duration::from_secs(now.load(Ordering::SeqCst))
    });
    (now, clock)
}

async fn body_of<S>(service: &mut S) -> Bytes
where
    S: Service<Request<()>, Response = Response<Full<Bytes>>>,
    S::Error: std::fmt::Debug,
{
    service
        .ready()
        .await
        .expect("service ready")
        .call(Request::get("/article").body(()).expect("request"))
        .await
        .expect("call succeeds")
        .into_body()
        .collect()
        .await
        .expect("body collected")
        .to_bytes()
}

#[tokio::test]
async fn entry_is_stale_exactly_at_s_maxage() {
    let (now, clock) = test_clock();
    let counter = Arc::new(AtomicUsize::new(0));

    let layer = CacheLayer::builder(MapBackend::new()).clock(clock).build();
    let mut service = layer.layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let response = Response::builder()
                    .header(CACHE_CONTROL, "s-maxage=60")
                    .body(Full::from(count.to_string()))
                    .expect("response");
                Ok::<_, std::convert::Infallible>(response)
            }
        }
    }));

    assert_eq!(body_of(&mut service).await, "1");

    now.fetch_add(59, Ordering::SeqCst);
    assert_eq!(body_of(&mut service).await, "1");

    now.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body_of(&mut service).await, "2");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn origin_date_anchors_freshness() {
    let (now, clock) = test_clock();
    now.fetch_add(50, Ordering::SeqCst);
    let counter = Arc::new(AtomicUsize::new(0));

    let layer = CacheLayer::builder(MapBackend::new()).clock(clock).build();
    let mut service = layer.layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                // Generated 50 seconds before the cache first sees it.
                let response = Response::builder()
                    .header(CACHE_CONTROL, "public, s-maxage=60")
                    .header(DATE, "Mon, 01 Jan 2024 00:00:00 GMT")
                    .body(Full::from(count.to_string()))
                    .expect("response");
                Ok::<_, std::convert::Infallible>(response)
            }
        }
    }));

    assert_eq!(body_of(&mut service).await, "1");
    now.fetch_add(9, Ordering::SeqCst);
    assert_eq!(body_of(&mut service).await, "1");
    now.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body_of(&mut service).await, "2");
}

#[tokio::test]
async fn entry_without_s_maxage_never_goes_stale() {
    let (now, clock) = test_clock();
    let counter = Arc::new(AtomicUsize::new(0));

    let layer = CacheLayer::builder(MapBackend::new()).clock(clock).build();
    let mut service = layer.layer(service_fn({
        let counter = counter.clone();
        move |_req: Request<()>| {
            let counter = counter.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let response = Response::builder()
                    .header(CACHE_CONTROL, "public, max-age=5")
                    .body(Full::from(count.to_string()))
                    .expect("response");
                Ok::<_, std::convert::Infallible>(response)
            }
        }
    }));

    assert_eq!(body_of(&mut service).await, "1");
    now.fetch_add(365 * 86_400, Ordering::SeqCst);
    assert_eq!(body_of(&mut service).await, "1");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
