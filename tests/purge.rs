use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::CACHE_CONTROL;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use tower::service_fn;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};
use tower_edge_cache::prelude::*;

type Origin = BoxCloneService<Request<()>, Response<Full<Bytes>>, Infallible>;

fn counting_origin(counter: Arc<AtomicUsize>) -> Origin {
    BoxCloneService::new(service_fn(move |_req: Request<()>| {
        let counter = counter.clone();
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let response = Response::builder()
                .header(CACHE_CONTROL, "s-maxage=3600")
                .body(Full::from(format!("call {call}")))
                .expect("response");
            Ok::<_, Infallible>(response)
        }
    }))
}

fn purge_method() -> Method {
    Method::from_bytes(b"PURGE").expect("extension method")
}

fn purge_from(uri: &str, peer: SocketAddr) -> Request<()> {
    Request::builder()
        .method(purge_method())
        .uri(uri)
        .extension(peer)
        .body(())
        .expect("request")
}

async fn send<S>(service: &mut S, req: Request<()>) -> (StatusCode, Bytes)
where
    S: Service<Request<()>, Response = Response<Full<Bytes>>>,
    S::Error: std::fmt::Debug,
{
    let response = service
        .ready()
        .await
        .expect("service ready")
        .call(req)
        .await
        .expect("call succeeds");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body collected")
        .to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<()> {
    Request::get(uri).body(()).expect("request")
}

#[tokio::test]
async fn denied_purge_leaves_entry_in_place() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = CacheLayer::new(MapBackend::new());
    let mut service = layer.layer(counting_origin(counter.clone()));

    send(&mut service, get("/wiki/Main_Page")).await;

    let (status, body) = send(
        &mut service,
        purge_from("/wiki/Main_Page", SocketAddr::from(([10, 0, 0, 7], 40000))),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, "Method not allowed");

    let (_, body) = send(&mut service, get("/wiki/Main_Page")).await;
    assert_eq!(body, "call 1", "entry survives a denied purge");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn allowed_purge_removes_entry() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = CacheLayer::new(MapBackend::new());
    let mut service = layer.layer(counting_origin(counter.clone()));

    send(&mut service, get("/wiki/Main_Page")).await;
    assert_eq!(layer.backend().len().await, 1);

    let (status, body) = send(
        &mut service,
        purge_from("/wiki/Main_Page", SocketAddr::from(([127, 0, 0, 1], 51234))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
    assert!(layer.backend().is_empty().await);

    let (_, body) = send(&mut service, get("/wiki/Main_Page")).await;
    assert_eq!(body, "call 2", "purged entry is refetched");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dual_stack_peer_matches_loopback_acl() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = CacheLayer::new(MapBackend::new());
    let mut service = layer.layer(counting_origin(counter.clone()));

    send(&mut service, get("/wiki/Main_Page")).await;

    let mapped = Ipv4Addr::LOCALHOST.to_ipv6_mapped();
    let (status, _) = send(
        &mut service,
        purge_from("/wiki/Main_Page", SocketAddr::from((mapped, 4567))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(layer.backend().is_empty().await);
}

#[tokio::test]
async fn purge_without_caller_address_is_denied() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut service =
        CacheLayer::new(MapBackend::new()).layer(counting_origin(counter.clone()));

    let req = Request::builder()
        .method(purge_method())
        .uri("/wiki/Main_Page")
        .header("x-forwarded-for", "127.0.0.1")
        .body(())
        .expect("request");
    let (status, _) = send(&mut service, req).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(counter.load(Ordering::SeqCst), 0, "purges never reach the origin");
}

#[tokio::test]
async fn cidr_acl_and_client_addr_extension() {
    let counter = Arc::new(AtomicUsize::new(0));
    let acl = PurgeAcl::new(["10.0.0.0/8", "::1"]).expect("valid acl");
    let layer = CacheLayer::builder(MapBackend::new()).purge_acl(acl).build();
    let mut service = layer.layer(counting_origin(counter.clone()));

    send(&mut service, get("http://wiki.example.org/page")).await;

    let local = purge_from(
        "http://wiki.example.org/page",
        SocketAddr::from(([127, 0, 0, 1], 8080)),
    );
    let (status, _) = send(&mut service, local).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "loopback is not listed");

    let req = Request::builder()
        .method(purge_method())
        .uri("http://wiki.example.org/page")
        .extension(SocketAddr::from(([127, 0, 0, 1], 8080)))
        .extension(ClientAddr::new("10.20.30.40:5555"))
        .body(())
        .expect("request");
    let (status, _) = send(&mut service, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(layer.backend().is_empty().await);
}

#[tokio::test]
async fn purging_an_absent_key_succeeds() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut service =
        CacheLayer::new(MapBackend::new()).layer(counting_origin(counter.clone()));

    let (status, _) = send(
        &mut service,
        purge_from("/never-cached", SocketAddr::from(([127, 0, 0, 1], 1))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn purge_acl_from_config() {
    let config = CacheConfig::from_json(
        r#"{ "backend": "moka", "purge_acl": ["192.168.0.0/16"] }"#,
    )
    .expect("valid config");
    let counter = Arc::new(AtomicUsize::new(0));
    let mut service = CacheLayer::from_config(&config)
        .expect("layer builds")
        .layer(counting_origin(counter.clone()));

    send(&mut service, get("/page")).await;

    let (status, _) = send(
        &mut service,
        purge_from("/page", SocketAddr::from(([192, 168, 1, 20], 9000))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    send(&mut service, get("/page")).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}
