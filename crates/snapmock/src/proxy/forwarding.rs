//! Forwarding of one exchange to its origin, with capture.
//!
//! Bodies are buffered in full in both directions; the client always gets
//! the complete upstream body while the recording keeps a snapshot capped at
//! `maxBodyBytes`.

use super::context::ProxyContext;
use super::headers::{end_to_end, to_pairs, VALUE_REQUEST, VALUE_UPSTREAM, X_SNAPMOCK_ERROR};
use crate::recording::{BodySnapshot, CaptureMode, RecordedRequest, RecordedResponse, Recording};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::http::uri::{Authority, Scheme};
use hyper::{HeaderMap, Request, Response, StatusCode, Uri, Version};
use std::time::Instant;
use tracing::{debug, warn};

/// JSON error body tagged with which side failed.
pub(crate) fn error_response(
    status: StatusCode,
    side: &HeaderValue,
    message: &str,
) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(X_SNAPMOCK_ERROR.clone(), side.clone());
    response
}

/// Host as recorded: the port is kept only when it is not the scheme default.
pub(crate) fn recorded_host(scheme: &Scheme, authority: &Authority) -> String {
    let default_port = if *scheme == Scheme::HTTPS { 443 } else { 80 };
    let host = authority.host().to_ascii_lowercase();
    match authority.port_u16() {
        Some(port) if port != default_port => format!("{host}:{port}"),
        _ => host,
    }
}

/// Relay `req` to `scheme://authority` and capture the exchange.
///
/// `authority` is the CONNECT target for tunneled requests; plain requests
/// take it from the absolute URI or the `Host` header. Failures become
/// error responses and never propagate.
pub(crate) async fn forward<B>(
    ctx: &ProxyContext,
    req: Request<B>,
    scheme: Scheme,
    authority: Option<Authority>,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let started = Instant::now();
    let timestamp = Utc::now();

    let Some(authority) = authority.or_else(|| target_authority(&req)) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &VALUE_REQUEST,
            "request has no target host",
        );
    };
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());
    let uri: Uri = match format!("{scheme}://{authority}{path_and_query}").parse() {
        Ok(uri) => uri,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &VALUE_REQUEST,
                &format!("invalid target: {e}"),
            )
        }
    };

    let (parts, body) = req.into_parts();
    let request_body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body for {}: {}", uri, e);
            return error_response(
                StatusCode::BAD_REQUEST,
                &VALUE_REQUEST,
                "failed to read request body",
            );
        }
    };

    let mut request_headers = end_to_end(&parts.headers);
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        request_headers.insert(HOST, host);
    }

    let mut upstream_req = Request::new(Full::new(request_body.clone()));
    *upstream_req.method_mut() = parts.method.clone();
    *upstream_req.uri_mut() = uri.clone();
    *upstream_req.version_mut() = Version::HTTP_11;
    *upstream_req.headers_mut() = request_headers.clone();

    let upstream_resp = match ctx.client.request(upstream_req).await {
        Ok(resp) => resp,
        Err(e) => {
            ctx.note_upstream_error();
            warn!("Upstream request to {} failed: {}", uri, e);
            return error_response(
                StatusCode::BAD_GATEWAY,
                &VALUE_UPSTREAM,
                &format!("upstream unreachable: {e}"),
            );
        }
    };
    let (resp_parts, resp_body) = upstream_resp.into_parts();
    let response_body = match resp_body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            ctx.note_upstream_error();
            warn!("Failed to read upstream response from {}: {}", uri, e);
            return error_response(
                StatusCode::BAD_GATEWAY,
                &VALUE_UPSTREAM,
                "failed to read upstream response",
            );
        }
    };
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    ctx.note_forwarded();

    let response_headers = end_to_end(&resp_parts.headers);
    let host = recorded_host(&scheme, &authority);
    debug!(
        "{} {}://{}{} -> {} ({} ms)",
        parts.method,
        scheme,
        host,
        path_and_query,
        resp_parts.status.as_u16(),
        duration_ms
    );

    if ctx.mode() == CaptureMode::Record {
        if ctx.filter.keep(&host, uri.path()) {
            let recording = Recording {
                id: Recording::new_id(),
                timestamp,
                duration_ms,
                request: RecordedRequest {
                    method: parts.method.as_str().to_string(),
                    scheme: scheme.as_str().to_string(),
                    host,
                    path: uri.path().to_string(),
                    query: uri.query().map(str::to_string),
                    headers: to_pairs(&request_headers),
                    body: BodySnapshot::capture(&request_body, ctx.max_body_bytes),
                },
                response: RecordedResponse {
                    status_code: resp_parts.status.as_u16(),
                    headers: to_pairs(&response_headers),
                    body: BodySnapshot::capture(&response_body, ctx.max_body_bytes),
                },
            };
            if let Err(e) = ctx.store.add_recording(recording).await {
                ctx.note_write_failure();
                warn!("Failed to persist exchange for {}: {}", uri, e);
            }
        } else {
            ctx.note_filtered_out();
            debug!("Filter declined {}{}", host, uri.path());
        }
    }

    let mut response = Response::new(Full::new(response_body));
    *response.status_mut() = resp_parts.status;
    *response.headers_mut() = response_headers;
    response
}

/// Authority from an absolute-form URI, else from the `Host` header.
fn target_authority<B>(req: &Request<B>) -> Option<Authority> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.clone());
    }
    host_header(req.headers())
}

fn host_header(headers: &HeaderMap) -> Option<Authority> {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.parse().ok())
}
