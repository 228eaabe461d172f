//! EPG endpoint tests against mock provider servers

mod common;

use std::time::Duration;

use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use iptv_relay::config::Config;

use common::*;

const GUIDE_A: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="Provider A">
  <channel id="bbc.uk"><display-name>BBC One</display-name></channel>
  <channel id="other.uk"><display-name>Other</display-name></channel>
  <programme start="20250101000000 +0000" channel="bbc.uk"><title>News</title></programme>
  <programme start="20250101000000 +0000" channel="other.uk"><title>Hidden</title></programme>
</tv>"#;

const GUIDE_B: &str = r#"<tv>
  <channel id="bbc.uk"><display-name>Duplicate</display-name></channel>
  <channel id="itv.uk"><display-name>ITV</display-name></channel>
  <programme start="20250101010000 +0000" channel="itv.uk"><title>Quiz</title></programme>
</tv>"#;

const GUIDE_C: &str = r#"<tv><channel id="ch4.uk"><display-name>Channel 4</display-name></channel></tv>"#;

/// Provider server: `/a` and `/b` answer immediately, `/slow` never in time,
/// `/broken` with a server error
async fn providers() -> String {
    let router = Router::new()
        .route("/a/xmltv.php", get(|| async { GUIDE_A }))
        .route("/b/xmltv.php", get(|| async { GUIDE_B }))
        .route("/c/xmltv.php", get(|| async { GUIDE_C }))
        .route(
            "/slow/xmltv.php",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                GUIDE_C
            }),
        )
        .route(
            "/broken/xmltv.php",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
        );
    let addr = spawn_upstream(router).await;
    format!("http://{addr}")
}

fn fast_timeout_config() -> Config {
    let mut config = Config::default();
    config.epg.fetch.timeout = Duration::from_millis(500);
    config.epg.fetch.connect_timeout = Duration::from_millis(500);
    config
}

#[tokio::test]
async fn test_single_provider_passes_guide_through() {
    let base = providers().await;
    let database = test_database().await;
    let provider = add_provider(&database, 1, &format!("{base}/a")).await;
    let server = test_server(app_state(Config::default(), database));

    let response = server
        .get(&format!("/epg/{}/{provider}", user_token(1)))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "application/xml; charset=utf-8");
    assert_eq!(response.header(header::CACHE_CONTROL), "public, max-age=3600");
    assert_eq!(response.header("x-accel-buffering"), "no");
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    assert_eq!(response.text(), GUIDE_A);
}

#[tokio::test]
async fn test_xmltv_alias_and_its_auth_failures() {
    let base = providers().await;
    let database = test_database().await;
    let provider = add_provider(&database, 1, &format!("{base}/c")).await;
    let server = test_server(app_state(Config::default(), database));
    let token = user_token(1);

    let response = server
        .get("/xmltv.php")
        .add_query_param("username", provider)
        .add_query_param("password", &token)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), GUIDE_C);

    let missing = server.get("/xmltv.php").add_query_param("username", provider).await;
    assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);

    let bad_provider = server
        .get("/xmltv.php")
        .add_query_param("username", "0")
        .add_query_param("password", &token)
        .await;
    assert_eq!(bad_provider.status_code(), StatusCode::UNAUTHORIZED);

    let bad_token = server
        .get("/xmltv.php")
        .add_query_param("username", provider)
        .add_query_param("password", "not-a-token")
        .await;
    assert_eq!(bad_token.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(bad_token.text(), "Unauthorized");
}

#[tokio::test]
async fn test_provider_of_another_user_is_not_found() {
    let base = providers().await;
    let database = test_database().await;
    let provider = add_provider(&database, 2, &format!("{base}/a")).await;
    let server = test_server(app_state(Config::default(), database));

    let response = server
        .get(&format!("/epg/{}/{provider}", user_token(1)))
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "Provider not found");
}

#[tokio::test]
async fn test_single_provider_error_status_is_empty_bad_gateway() {
    let base = providers().await;
    let database = test_database().await;
    let provider = add_provider(&database, 1, &format!("{base}/broken")).await;
    let server = test_server(app_state(Config::default(), database));

    let response = server
        .get(&format!("/epg/{}/{provider}", user_token(1)))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(response.as_bytes().is_empty());
}

#[tokio::test]
async fn test_merge_filters_and_dedups_across_providers() {
    let base = providers().await;
    let database = test_database().await;
    let a = add_provider(&database, 1, &format!("{base}/a")).await;
    let b = add_provider(&database, 1, &format!("{base}/b")).await;
    add_stream(&database, 1, a, "BBC.UK", "BBC One").await;
    add_stream(&database, 1, b, "itv.uk", "ITV").await;
    let server = test_server(app_state(Config::default(), database));

    let response = server.get(&format!("/epg/{}", user_token(1))).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "application/xml; charset=utf-8");
    let body = response.text();
    assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<tv generator-info-name=\"IPTV Relay\">\n"));
    assert!(body.ends_with("</tv>"));

    assert_eq!(body.matches("<channel ").count(), 2);
    assert!(body.contains("<display-name>BBC One</display-name>"));
    assert!(!body.contains("Duplicate"));
    assert!(!body.contains("other.uk"));
    assert!(!body.contains("Hidden"));

    let bbc = body.find("<channel id=\"bbc.uk\">").unwrap();
    let itv = body.find("<channel id=\"itv.uk\">").unwrap();
    let first_programme = body.find("<programme ").unwrap();
    assert!(bbc < itv);
    assert!(itv < first_programme);
    assert!(body.contains("<title>News</title>"));
    assert!(body.contains("<title>Quiz</title>"));
}

#[tokio::test]
async fn test_merge_survives_timeouts_and_failures() {
    let base = providers().await;
    let database = test_database().await;
    add_provider(&database, 1, &format!("{base}/slow")).await;
    let a = add_provider(&database, 1, &format!("{base}/a")).await;
    add_provider(&database, 1, &format!("{base}/broken")).await;
    add_stream(&database, 1, a, "bbc.uk", "BBC One").await;
    let server = test_server(app_state(fast_timeout_config(), database));

    let response = server.get(&format!("/epg/{}", user_token(1))).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.text();
    assert!(body.contains("<channel id=\"bbc.uk\">"));
    assert!(body.contains("<title>News</title>"));
    assert!(!body.contains("ch4.uk"));
}

#[tokio::test]
async fn test_merge_with_no_successful_provider_is_empty_bad_gateway() {
    let base = providers().await;
    let database = test_database().await;
    add_provider(&database, 1, &format!("{base}/slow")).await;
    add_provider(&database, 1, &format!("{base}/broken")).await;
    let server = test_server(app_state(fast_timeout_config(), database));

    let response = server.get(&format!("/epg/{}", user_token(1))).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(response.as_bytes().is_empty());
}

#[tokio::test]
async fn test_merge_for_user_without_providers() {
    let database = test_database().await;
    let server = test_server(app_state(Config::default(), database));

    let response = server.get(&format!("/epg/{}", user_token(9))).await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "Providers not found");
}

#[tokio::test]
async fn test_health_reports_connected_database() {
    let database = test_database().await;
    let server = test_server(app_state(Config::default(), database));

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let json: serde_json::Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "connected");
}
