//! Builds a cache from JSON configuration, serves a page twice, purges it
//! and fetches it again.
//!
//! Run with `RUST_LOG=tower_edge_cache=debug cargo run --example quickstart`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_edge_cache::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "backend": "moka",
    "backend_options": { "MaxCapacity": "16777216", "time-to-live": "3600" },
    "purge_acl": ["127.0.0.1", "10.0.0.0/8"]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tower_edge_cache=debug")),
        )
        .init();

    let config = CacheConfig::from_json(CONFIG)?;
    let layer = CacheLayer::from_config(&config)?;

    let origin_calls = Arc::new(AtomicUsize::new(0));
    let mut service = ServiceBuilder::new().layer(layer).service(tower::service_fn({
        let origin_calls = origin_calls.clone();
        move |req: Request<()>| {
            let origin_calls = origin_calls.clone();
            async move {
                let call = origin_calls.fetch_add(1, Ordering::SeqCst) + 1;
                let response = Response::builder()
                    .header("cache-control", "public, s-maxage=300")
                    .header("content-type", "text/plain")
                    .body(Full::from(format!("{} rendered by origin (#{call})", req.uri())))
                    .expect("valid response");
                Ok::<_, Infallible>(response)
            }
        }
    }));

    let page = "http://wiki.example.org/wiki/Main_Page";
    let peer = SocketAddr::from(([127, 0, 0, 1], 50_000));

    for _ in 0..2 {
        let req = Request::get(page).body(())?;
        let body = fetch(&mut service, req).await?;
        println!("GET   -> {body}");
    }

    let purge = Request::builder()
        .method(Method::from_bytes(b"PURGE")?)
        .uri(page)
        .extension(peer)
        .body(())?;
    let response = service.ready().await?.call(purge).await?;
    println!("PURGE -> {}", response.status());

    let body = fetch(&mut service, Request::get(page).body(())?).await?;
    println!("GET   -> {body}");
    println!("origin was called {} times", origin_calls.load(Ordering::SeqCst));

    Ok(())
}

async fn fetch<S>(service: &mut S, req: Request<()>) -> Result<String, S::Error>
where
    S: Service<Request<()>, Response = Response<Full<Bytes>>>,
{
    let response = service.ready().await?.call(req).await?;
    let body = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };
    Ok(String::from_utf8_lossy(&body).into_owned())
}
