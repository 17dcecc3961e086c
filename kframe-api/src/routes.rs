//! Frame routes.
//!
//! Relative to the configured base path:
//! - `GET /i` - the i-frame, publicly cacheable until its expiration
//! - `GET /p/{version}` - the p-frame for `version`, revalidated by etag
//! - `/clear`, `/install`, `/uninstall`, `/reinstall`, each optionally
//!   followed by `/{access code}` - administrative calls, plain-text reply

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, response::Builder, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use chrono::Utc;

use kframe_core::FrameVersion;
use kframe_storage::{is_iframe_etag, AdminAction, FrameRepository, IFRAME_ETAG};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::trace::{FrameTrace, TraceAction, TraceMethod};

const JSON: &str = "application/json";

pub fn create_router() -> Router<AppState> {
    let mut router = Router::new()
        .route("/i", get(get_iframe))
        .route("/p", get(missing_version))
        .route("/p/:version", get(get_pframe));

    for action in AdminAction::ALL {
        let path = format!("/{}", action);
        router = router
            .route(
                &path,
                any(move |State(repository): State<FrameRepository>| {
                    admin(repository, action, String::new())
                }),
            )
            .route(
                &format!("{}/*code", path),
                any(
                    move |State(repository): State<FrameRepository>, Path(code): Path<String>| {
                        admin(repository, action, format!("/{}", code))
                    },
                ),
            );
    }
    router
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn get_iframe(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let mut trace = FrameTrace::new(TraceMethod::IFrame);
    let repository = &state.repository;

    if let Some(etag) = if_none_match(&headers).filter(|etag| is_iframe_etag(etag)) {
        repository.record_not_modified();
        return Ok(not_modified(trace, etag));
    }

    let read = repository.get_iframe().await?;
    if read.was_built() {
        trace.action = TraceAction::BuildIFrame;
    }
    trace.iframes = read.value().iter().map(|entry| entry.frame.as_i64()).collect();
    let body = serde_json::to_vec(read.value().as_slice())?;

    let max_age = repository.timing().iframe_max_age;
    let expires = Utc::now()
        + chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
    trace.max_age = Some(max_age);
    trace.expires = Some(expires);
    trace.etag = Some(IFRAME_ETAG.to_string());
    trace.content_length = Some(body.len() as u64);

    let builder = frame_response(&state)
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", max_age.as_secs()),
        )
        .header(
            header::EXPIRES,
            expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        )
        .header(header::ETAG, IFRAME_ETAG);
    let response = finish(builder, body)?;
    trace.log();
    Ok(response)
}

async fn get_pframe(
    State(state): State<AppState>,
    Path(version): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut trace = FrameTrace::new(TraceMethod::PFrame);
    let Ok(version) = version.parse::<FrameVersion>() else {
        return Ok(not_found(trace));
    };
    trace.iframes = vec![version.as_i64()];
    let repository = &state.repository;

    if let Some(etag) = if_none_match(&headers).filter(|etag| repository.has_pframe(etag)) {
        repository.record_not_modified();
        return Ok(not_modified(trace, etag));
    }

    let read = repository.get_pframe(version).await?;
    trace.action = if read.was_built() {
        TraceAction::BuildPFrame
    } else if read.staleness() >= repository.timing().pframe_expiration {
        TraceAction::CheckPFrame
    } else {
        TraceAction::None
    };
    let pframe = read.into_value();
    let body = serde_json::to_vec(pframe.entries.as_slice())?;
    trace.etag = Some(pframe.etag.clone());
    trace.content_length = Some(body.len() as u64);

    let builder = frame_response(&state)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ETAG, pframe.etag);
    let response = finish(builder, body)?;
    trace.log();
    Ok(response)
}

async fn missing_version() -> Response {
    not_found(FrameTrace::new(TraceMethod::PFrame))
}

async fn admin(
    repository: FrameRepository,
    action: AdminAction,
    access_code: String,
) -> ApiResult<Response> {
    let mut trace = FrameTrace::new(TraceMethod::from(action));
    let reply = repository.admin(action, &access_code).await?;
    trace.access_denied = reply.access_denied;
    trace.log();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reply.body,
    )
        .into_response())
}

pub async fn fallback() -> ApiError {
    ApiError::not_found()
}

// ============================================================================
// HELPERS
// ============================================================================

fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn frame_response(state: &AppState) -> Builder {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, JSON);
    if state.config.cors_allow_all {
        builder.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
    } else {
        builder
    }
}

fn finish(builder: Builder, body: Vec<u8>) -> ApiResult<Response> {
    builder
        .body(Body::from(body))
        .map_err(|e| ApiError::internal_error(format!("Failed to build frame response: {}", e)))
}

fn not_modified(mut trace: FrameTrace, etag: &str) -> Response {
    trace.status = StatusCode::NOT_MODIFIED.as_u16();
    trace.from_etag = Some(etag.to_string());
    trace.log();
    StatusCode::NOT_MODIFIED.into_response()
}

fn not_found(mut trace: FrameTrace) -> Response {
    trace.status = StatusCode::NOT_FOUND.as_u16();
    trace.log();
    StatusCode::NOT_FOUND.into_response()
}
