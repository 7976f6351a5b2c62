use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use regex::Regex;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub static X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Id attached to every request's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

fn is_acceptable(id: &str) -> bool {
    lazy_static! {
        static ref REQUEST_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").unwrap();
    }
    REQUEST_ID_RE.is_match(id)
}

/// Reuses the client's `X-Request-ID` (or `X-Correlation-ID` when that is
/// absent) if it looks sane, otherwise mints 16 random bytes as hex.
pub fn pick_request_id(headers: &HeaderMap) -> String {
    let header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    match header(&X_REQUEST_ID).or_else(|| header(&X_CORRELATION_ID)) {
        Some(id) if is_acceptable(id) => id.to_string(),
        _ => random_id(),
    }
}

fn random_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub async fn assign_request_id(mut req: Request, next: Next) -> Response {
    let id = pick_request_id(req.headers());
    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    res
}
