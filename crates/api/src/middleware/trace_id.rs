//! Request ID propagation.
//!
//! Every request runs inside a `request` span carrying its `X-Request-ID`,
//! so logs emitted by handlers and the import jobs they spawn correlate.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuse the caller's request ID when it is a valid header value, otherwise
/// generate a UUID v4.
fn resolve_request_id(req: &Request<Body>) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn trace_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = resolve_request_id(&req);
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let start = std::time::Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_request_id_is_reused() {
        let req = Request::builder()
            .header(REQUEST_ID_HEADER, "import-42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(resolve_request_id(&req), "import-42");
    }

    #[test]
    fn test_missing_or_blank_request_id_is_generated() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(Uuid::parse_str(&resolve_request_id(&req)).is_ok());

        let req = Request::builder()
            .header(REQUEST_ID_HEADER, "  ")
            .body(Body::empty())
            .unwrap();
        assert!(Uuid::parse_str(&resolve_request_id(&req)).is_ok());
    }
}
