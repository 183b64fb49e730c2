//! Body framing middleware.
//!
//! Requests: a gzip body is inflated, then checked against its `HashSHA256` header
//! when both the header and a server key are present. Responses: the body is signed
//! before the compression layer above gets to it.

use super::error::ApiError;
use super::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use metrix_core::envelope::{sign, Envelope};
use std::time::Instant;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub static HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

pub async fn frame_body(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    let gzip = parts
        .headers
        .get(CONTENT_ENCODING)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"));
    let signature =
        parts.headers.get(&HASH_HEADER_NAME).and_then(|v| v.to_str().ok()).map(str::to_owned);
    let key = state.key.as_deref().filter(|_| signature.is_some());

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable body: {}", e)))?;
    let json = Envelope { body: body.to_vec(), gzip, signature }.open(key)?;

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    let response = next.run(Request::from_parts(parts, Body::from(json))).await;

    let Some(key) = state.key.as_deref() else {
        return Ok(response);
    };

    let (mut parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::Internal(format!("unreadable response body: {}", e)))?;
    if !body.is_empty() {
        let signature = sign(&body, key)?;
        let value = HeaderValue::from_str(&signature)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        parts.headers.insert(HASH_HEADER_NAME.clone(), value);
    }
    Ok(Response::from_parts(parts, Body::from(body)))
}

/// Count every request by matched route and status.
pub async fn record_request(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let start = Instant::now();

    let response = next.run(request).await;

    metrix_core::observability::metrics::record_api_request(
        endpoint,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}
