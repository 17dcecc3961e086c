//! Frame routes driven in process through the full router.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use kframe_api::{create_app, ApiConfig};
use kframe_storage::{FrameOptions, FrameRepository, INVALID_ACCESS_TOKEN};
use kframe_test_utils::{memory_repository, seeded_source};

async fn served(options: FrameOptions, config: ApiConfig) -> (Router, FrameRepository) {
    let repository = memory_repository(seeded_source().await, options);
    (create_app(repository.clone(), config), repository)
}

async fn get(app: &Router, uri: &str) -> Response {
    request(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn get_if_none_match(app: &Router, uri: &str, etag: &str) -> Response {
    let req = Request::get(uri)
        .header(header::IF_NONE_MATCH, etag)
        .body(Body::empty())
        .unwrap();
    request(app, req).await
}

async fn request(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_iframe_response() {
    let (app, repository) = served(FrameOptions::new(), ApiConfig::default()).await;

    let response = get(&app, "/@frame/i").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::ETAG), Some("\"iframe\""));
    assert_eq!(
        header_str(&response, header::CACHE_CONTROL),
        Some("public, max-age=3600")
    );
    assert_eq!(
        header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some("*")
    );
    assert!(header_str(&response, header::EXPIRES).is_some_and(|v| v.ends_with("GMT")));

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body[0]["frame"], 2);
    assert_eq!(body[0]["articles"].as_array().map(Vec::len), Some(2));
    assert_eq!(repository.stats().iframe_builds, 1);
}

#[tokio::test]
async fn test_iframe_etag_is_not_modified_without_build() {
    let (app, repository) = served(FrameOptions::new(), ApiConfig::default()).await;

    let response = get_if_none_match(&app, "/@frame/i", "\"iframe\"").await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let stats = repository.stats();
    assert_eq!(stats.iframe_builds, 0);
    assert_eq!(stats.not_modified, 1);
}

#[tokio::test]
async fn test_pframe_conditional_get() {
    let (app, repository) = served(FrameOptions::new(), ApiConfig::default()).await;
    get(&app, "/@frame/i").await;

    let response = get(&app, "/@frame/p/2").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CACHE_CONTROL), Some("no-cache"));
    let etag = header_str(&response, header::ETAG).unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body.is_array());

    let response = get_if_none_match(&app, "/@frame/p/2", &etag).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let response = get_if_none_match(&app, "/@frame/p/2", "\"stale\"").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::ETAG), Some(etag.as_str()));

    let stats = repository.stats();
    assert_eq!(stats.pframe_builds, 1);
    assert_eq!(stats.not_modified, 1);
}

#[tokio::test]
async fn test_unknown_paths_are_not_found() {
    let (app, repository) = served(FrameOptions::new(), ApiConfig::default()).await;

    for uri in ["/@frame/p/abc", "/@frame/p", "/@frame/x", "/elsewhere"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
    assert_eq!(repository.stats().builds(), 0);
}

#[tokio::test]
async fn test_admin_requires_access_code() {
    let options = FrameOptions::new().with_access_token("secret");
    let config = ApiConfig::default().with_access_token("secret");
    let source = seeded_source().await;
    let repository = memory_repository(source.clone(), options);
    let app = create_app(repository, config);

    let response = get(&app, "/@frame/uninstall/wrong").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, INVALID_ACCESS_TOKEN);

    let response = get(&app, "/@frame/uninstall").await;
    assert_eq!(body_text(response).await, INVALID_ACCESS_TOKEN);
    assert_eq!(source.chapters().await.len(), 1);

    let response = get(&app, "/@frame/reinstall/secret").await;
    assert_eq!(
        body_text(response).await,
        "mem: uninstalled articles\nmem: installed articles\n"
    );
}

#[tokio::test]
async fn test_clear_drops_cached_frames() {
    let (app, repository) = served(FrameOptions::new(), ApiConfig::default()).await;
    get(&app, "/@frame/i").await;
    get(&app, "/@frame/p/2").await;

    let response = get(&app, "/@frame/clear").await;
    assert_eq!(body_text(response).await, "mem: cleared articles\n");
    assert!(repository.delta_cache().is_empty());

    // Clearing bumped the source version.
    let body: Value = serde_json::from_str(&body_text(get(&app, "/@frame/i").await).await).unwrap();
    assert_eq!(body[0]["frame"], 3);
    assert_eq!(body[0]["articles"].as_array().map(Vec::len), Some(0));
    assert_eq!(repository.stats().iframe_builds, 2);
}

#[tokio::test]
async fn test_custom_base_path_without_cors() {
    let config = ApiConfig {
        cors_allow_all: false,
        ..ApiConfig::default()
    }
    .with_base_path("frames/");
    let (app, _) = served(FrameOptions::new(), config).await;

    assert_eq!(get(&app, "/@frame/i").await.status(), StatusCode::NOT_FOUND);
    let response = get(&app, "/frames/i").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
