//! Reverse proxy forwarder mounted under `/relay`.
//!
//! Relays any supported verb to the configured backend, passing only an
//! allow-list of request headers, and mirrors the upstream response back:
//! status, headers and every individual `Set-Cookie` value.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{HeaderName, CONNECTION, CONTENT_LENGTH, SET_COOKIE, TRANSFER_ENCODING},
        HeaderMap, Method, Uri,
    },
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::{
    error::{classify_reqwest_error, ProxyError},
    handlers::AppState,
    resolver::RELAY_PREFIX,
    validation::{sanitize_url_for_logging, BackendTarget},
};

/// The only request headers that reach the backend
pub const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "content-type",
    "cookie",
    "authorization",
    "x-requested-with",
];

/// Upstream headers not copied verbatim: framing is recomputed by the
/// server and cookies are replayed separately
const SKIPPED_RESPONSE_HEADERS: [HeaderName; 4] =
    [CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION, SET_COOKIE];

/// `/relay` and `/relay/{*path}`
pub async fn relay_handler(State(state): State<AppState>, request: Request) -> Response {
    let path = captured_path(request.uri()).to_string();
    forward(&state, &path, request)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// Path after the relay prefix, still percent-encoded
pub fn captured_path(uri: &Uri) -> &str {
    uri.path()
        .strip_prefix(RELAY_PREFIX)
        .unwrap_or_default()
        .trim_start_matches('/')
}

/// Forward one request to the backend and mirror its response
pub async fn forward(state: &AppState, path: &str, request: Request) -> Result<Response, ProxyError> {
    let base = state
        .config
        .relay_base()
        .ok_or_else(|| ProxyError::misconfigured("API base URL is not configured"))?;
    let target = BackendTarget::parse(base)?;

    let (parts, body) = request.into_parts();
    let url = target.rewrite(path, parts.uri.query());
    let safe_url = sanitize_url_for_logging(url.as_str());

    debug!(url = %safe_url, method = %parts.method, "Relaying request");

    let mut upstream_request = state
        .client
        .request(parts.method.clone(), url)
        .headers(forwarded_headers(&parts.headers));

    if parts.method != Method::GET && parts.method != Method::HEAD {
        upstream_request =
            upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let start = Instant::now();
    let upstream = upstream_request.send().await.map_err(|e| {
        let message = classify_reqwest_error(&e);
        error!(url = %safe_url, error = %e, "Backend unreachable");
        ProxyError::unreachable(message)
    })?;
    let elapsed = start.elapsed().as_millis() as u64;

    let status = upstream.status();
    let headers = mirrored_headers(upstream.headers());

    info!(
        url = %safe_url,
        method = %parts.method,
        status = status.as_u16(),
        elapsed_ms = elapsed,
        "Relay completed"
    );

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Copy the allow-listed request headers, dropping everything else
pub fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_REQUEST_HEADERS {
        for value in incoming.get_all(*name) {
            headers.append(*name, value.clone());
        }
    }
    headers
}

/// Copy the upstream headers. `Set-Cookie` values are appended one by one,
/// never merged.
pub fn mirrored_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if SKIPPED_RESPONSE_HEADERS.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    for cookie in upstream.get_all(SET_COOKIE) {
        headers.append(SET_COOKIE, cookie.clone());
    }
    headers
}
