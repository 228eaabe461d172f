//! Live relay endpoint tests
//!
//! The mock upstream listens on loopback, which the target guard rejects, so
//! it is reached through the hostname `media.test` that resolves to a public
//! address during validation and is pinned to the mock for the fetch itself.

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Redirect},
    routing::get,
};
use axum_test::TestServer;
use bytes::Bytes;
use futures::StreamExt;
use iptv_relay::{config::Config, web::WebServer};
use tower::ServiceExt;

use common::*;

const MEDIA_HOST: &str = "media.test";

const PLAYLIST: &str =
    "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:10,\nseg1.ts\n\n#EXTINF:10,\n/abs/seg2.ts\nhttp://cdn.example.com/seg3.ts\n";

fn media_router() -> Router {
    Router::new()
        .route(
            "/live/index.m3u8",
            get(|| async { ([(header::CONTENT_TYPE, "application/x-mpegURL")], PLAYLIST).into_response() }),
        )
        .route(
            "/live/seg1.ts",
            get(|| async {
                (
                    [
                        (header::CONTENT_TYPE, "application/octet-stream"),
                        (header::SET_COOKIE, "session=secret"),
                    ],
                    "transport-stream-bytes",
                )
                    .into_response()
            }),
        )
        .route(
            "/vod/movie.mp4",
            get(|headers: HeaderMap| async move {
                match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
                    Some("bytes=0-3") => (
                        StatusCode::PARTIAL_CONTENT,
                        [
                            (header::CONTENT_TYPE, "video/mp4"),
                            (header::CONTENT_RANGE, "bytes 0-3/10"),
                            (header::ACCEPT_RANGES, "bytes"),
                        ],
                        "0123",
                    )
                        .into_response(),
                    Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
                    None => ([(header::CONTENT_TYPE, "video/mp4")], "0123456789").into_response(),
                }
            }),
        )
        .route(
            "/live/missing.m3u8",
            get(|| async { StatusCode::NOT_FOUND.into_response() }),
        )
        .route(
            "/live/hop.ts",
            get(|headers: HeaderMap| async move {
                // Same port as this server, reached under the internal name
                let port = headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|host| host.rsplit(':').next())
                    .unwrap_or_default()
                    .to_string();
                Redirect::temporary(&format!("http://{INTERNAL_HOST}:{port}/secret"))
            }),
        )
        .route("/secret", get(|| async { "TOP-SECRET" }))
}

/// Relay server wired to a fresh mock upstream, plus the mock's port
async fn media_server(config: Config) -> (TestServer, u16) {
    let upstream = spawn_upstream(media_router()).await;
    let database = test_database().await;
    let server = test_server(relay_state(config, database, MEDIA_HOST, upstream));
    (server, upstream.port())
}

fn media_url(port: u16, path: &str) -> String {
    format!("http://{MEDIA_HOST}:{port}{path}")
}

#[tokio::test]
async fn test_preflight_and_method_gate() {
    let (server, _) = media_server(Config::default()).await;

    let preflight = server.method(Method::OPTIONS, "/proxy/stream").await;
    assert_eq!(preflight.status_code(), StatusCode::NO_CONTENT);
    assert_eq!(preflight.header(header::ACCESS_CONTROL_ALLOW_METHODS), "GET, HEAD, OPTIONS");
    assert_eq!(preflight.header(header::ACCESS_CONTROL_MAX_AGE), "86400");

    let post = server.post("/proxy/stream").await;
    assert_eq!(post.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(post.header(header::ALLOW), "GET, HEAD, OPTIONS");
    assert_eq!(post.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
}

#[tokio::test]
async fn test_target_rejections() {
    let mut config = Config::default();
    config.relay.allowed_domains = vec![MEDIA_HOST.to_string()];
    let (server, port) = media_server(config).await;

    let missing = server.get("/proxy/stream").await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(missing.text(), "No URL provided");

    let loopback = server
        .get("/proxy/stream")
        .add_query_param("url", "http://127.0.0.1/live/index.m3u8")
        .await;
    assert_eq!(loopback.status_code(), StatusCode::FORBIDDEN);

    let credentials = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/x.ts").replace("://", "://u:p@"))
        .await;
    assert_eq!(credentials.status_code(), StatusCode::BAD_REQUEST);

    let scheme = server
        .get("/proxy/stream")
        .add_query_param("url", "ftp://media.test/x.ts")
        .await;
    assert_eq!(scheme.status_code(), StatusCode::BAD_REQUEST);

    let long = format!("{}?pad={}", media_url(port, "/x.ts"), "a".repeat(2100));
    let too_long = server.get("/proxy/stream").add_query_param("url", long).await;
    assert_eq!(too_long.status_code(), StatusCode::URI_TOO_LONG);
    assert_eq!(too_long.text(), "URL too long");
}

#[tokio::test]
async fn test_domain_outside_allow_list_is_forbidden() {
    let mut config = Config::default();
    config.relay.allowed_domains = vec!["cdn.example.com".to_string()];
    let (server, port) = media_server(config).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/live/index.m3u8"))
        .await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "Domain not allowed");
}

#[tokio::test]
async fn test_playlist_references_are_rewritten() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/live/index.m3u8"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "application/vnd.apple.mpegurl");
    assert_eq!(response.header(header::CACHE_CONTROL), "no-cache, no-store, must-revalidate");
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");

    let relay = |absolute: &str| format!("/proxy/stream?url={}", urlencoding::encode(absolute));
    let expected = [
        "#EXTM3U".to_string(),
        "#EXT-X-VERSION:3".to_string(),
        "#EXTINF:10,".to_string(),
        relay(&media_url(port, "/live/seg1.ts")),
        String::new(),
        "#EXTINF:10,".to_string(),
        relay(&media_url(port, "/abs/seg2.ts")),
        relay("http://cdn.example.com/seg3.ts"),
        String::new(),
    ]
    .join("\n");
    assert_eq!(response.text(), expected);
}

#[tokio::test]
async fn test_playlist_upstream_error_is_bad_gateway() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/live/missing.m3u8"))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Failed to fetch playlist");
}

#[tokio::test]
async fn test_transport_stream_is_relayed_as_mpeg_ts() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/live/seg1.ts"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "video/mp2t");
    assert!(response.maybe_header(header::SET_COOKIE).is_none());
    assert_eq!(response.text(), "transport-stream-bytes");
}

#[tokio::test]
async fn test_range_requests_are_forwarded() {
    let (server, port) = media_server(Config::default()).await;

    let partial = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/vod/movie.mp4"))
        .add_header(header::RANGE, "bytes=0-3")
        .await;
    assert_eq!(partial.status_code(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.header(header::CONTENT_RANGE), "bytes 0-3/10");
    assert_eq!(partial.header(header::CONTENT_TYPE), "video/mp4");
    assert_eq!(partial.text(), "0123");

    // Malformed ranges are dropped rather than forwarded
    let malformed = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/vod/movie.mp4"))
        .add_header(header::RANGE, "items=0-3")
        .await;
    assert_eq!(malformed.status_code(), StatusCode::OK);
    assert_eq!(malformed.text(), "0123456789");
}

#[tokio::test]
async fn test_head_returns_headers_without_body() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .method(Method::HEAD, "/proxy/stream")
        .add_query_param("url", media_url(port, "/live/seg1.ts"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "video/mp2t");
    assert!(response.as_bytes().is_empty());
}

#[tokio::test]
async fn test_head_on_playlist_returns_playlist_headers_without_body() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .method(Method::HEAD, "/proxy/stream")
        .add_query_param("url", media_url(port, "/live/index.m3u8"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "application/vnd.apple.mpegurl");
    assert_eq!(response.header(header::CACHE_CONTROL), "no-cache, no-store, must-revalidate");
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    assert!(response.as_bytes().is_empty());
}

#[tokio::test]
async fn test_oversized_playlist_is_bad_gateway() {
    let mut config = Config::default();
    config.relay.max_playlist_bytes = 16;
    let (server, port) = media_server(config).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/live/index.m3u8"))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text(), "Playlist too large");
}

#[tokio::test]
async fn test_redirect_to_internal_name_is_refused() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", media_url(port, "/live/hop.ts"))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(!response.text().contains("TOP-SECRET"));
}

#[tokio::test]
async fn test_internal_name_is_forbidden_as_target() {
    let (server, port) = media_server(Config::default()).await;

    let response = server
        .get("/proxy/stream")
        .add_query_param("url", format!("http://{INTERNAL_HOST}:{port}/secret"))
        .await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

/// Endless live feed that counts every chunk it hands to the connection
fn endless_feed(served: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/live/channel.ts",
        get(move || {
            let served = served.clone();
            async move {
                let chunks = futures::stream::unfold(served, |served| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    served.fetch_add(1, Ordering::SeqCst);
                    Some((Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; 1024])), served))
                });
                Body::from_stream(chunks)
            }
        }),
    )
}

#[tokio::test]
async fn test_client_disconnect_stops_upstream_transfer() {
    let served = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(endless_feed(served.clone())).await;
    let database = test_database().await;
    let router = WebServer::create_router(relay_state(Config::default(), database, MEDIA_HOST, upstream));

    let uri = format!(
        "/proxy/stream?url={}",
        urlencoding::encode(&media_url(upstream.port(), "/live/channel.ts"))
    );
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");

    let mut body = response.into_body().into_data_stream();
    for _ in 0..3 {
        assert!(!body.next().await.unwrap().unwrap().is_empty());
    }
    drop(body);

    // Give the relay time to notice and the upstream time to see the socket close
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after_disconnect = served.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(after_disconnect > 0);
    assert_eq!(served.load(Ordering::SeqCst), after_disconnect);
}
